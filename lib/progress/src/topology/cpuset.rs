// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Machine-word CPU bitmaps.
//!
//! A [`CpuSet`] is a growable bitmap over hardware-thread indices. Its
//! word representation (`&[u64]`) is the wire format for the peer-wise
//! exchange during bind planning, so word round-trips must be lossless
//! and equality must ignore trailing zero words.

use std::fmt;

use anyhow::{bail, Result};

const BITS: usize = u64::BITS as usize;

/// A set of hardware-thread indices.
///
/// Internally a little-endian word bitmap with no trailing zero words,
/// which makes derived equality and hashing semantic.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    words: Vec<u64>,
}

impl CpuSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a set from its word masks.
    pub fn from_words(words: &[u64]) -> Self {
        let mut set = Self {
            words: words.to_vec(),
        };
        set.normalize();
        set
    }

    /// Build a set from an iterator of CPU indices.
    pub fn from_cpus<I: IntoIterator<Item = usize>>(cpus: I) -> Self {
        let mut set = Self::new();
        for cpu in cpus {
            set.set(cpu);
        }
        set
    }

    /// Parse a kernel cpulist such as `0-3,8,10-11`.
    pub fn from_cpulist(list: &str) -> Result<Self> {
        let mut set = Self::new();
        for part in list.trim().split(',') {
            if part.is_empty() {
                continue;
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse()?;
                    let hi: usize = hi.trim().parse()?;
                    if hi < lo {
                        bail!("invalid cpu range '{part}'");
                    }
                    for cpu in lo..=hi {
                        set.set(cpu);
                    }
                }
                None => set.set(part.trim().parse()?),
            }
        }
        Ok(set)
    }

    /// The word masks, trailing zero words trimmed.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Add a CPU to the set.
    pub fn set(&mut self, cpu: usize) {
        let word = cpu / BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (cpu % BITS);
    }

    /// Whether a CPU is in the set.
    pub fn is_set(&self, cpu: usize) -> bool {
        self.words
            .get(cpu / BITS)
            .map_or(false, |w| w & (1 << (cpu % BITS)) != 0)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest CPU index in the set.
    pub fn last(&self) -> Option<usize> {
        let word = self.words.last()?;
        Some((self.words.len() - 1) * BITS + (BITS - 1 - word.leading_zeros() as usize))
    }

    /// Reduce the set to its lowest CPU.
    pub fn singlify(&mut self) {
        let first = self.iter().next();
        if let Some(cpu) = first {
            self.words.clear();
            self.set(cpu);
        }
    }

    /// Whether every CPU of `self` is in `other`.
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.iter().all(|cpu| other.is_set(cpu))
    }

    /// Whether the two sets share any CPU.
    pub fn intersects(&self, other: &CpuSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Ascending iterator over CPU indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(i, &w)| (0..BITS).filter(move |b| w & (1 << b) != 0).map(move |b| i * BITS + b))
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl fmt::Display for CpuSet {
    /// Kernel cpulist format (`0-3,8`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(lo: usize, hi: usize) -> String {
            if lo == hi {
                lo.to_string()
            } else {
                format!("{lo}-{hi}")
            }
        }

        let mut parts: Vec<String> = Vec::new();
        let mut run: Option<(usize, usize)> = None;
        for cpu in self.iter() {
            run = match run {
                Some((lo, hi)) if cpu == hi + 1 => Some((lo, cpu)),
                Some((lo, hi)) => {
                    parts.push(render(lo, hi));
                    Some((cpu, cpu))
                }
                None => Some((cpu, cpu)),
            };
        }
        if let Some((lo, hi)) = run {
            parts.push(render(lo, hi));
        }
        write!(f, "{}", parts.join(","))
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuSet({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_query() {
        let mut set = CpuSet::new();
        assert!(set.is_empty());
        set.set(0);
        set.set(65);
        assert!(set.is_set(0));
        assert!(set.is_set(65));
        assert!(!set.is_set(64));
        assert_eq!(set.count(), 2);
        assert_eq!(set.last(), Some(65));
    }

    #[test]
    fn word_round_trip() {
        let set = CpuSet::from_cpus([1, 63, 64, 130]);
        let rebuilt = CpuSet::from_words(set.words());
        assert_eq!(set, rebuilt);
        assert_eq!(rebuilt.iter().collect::<Vec<_>>(), vec![1, 63, 64, 130]);
    }

    #[test]
    fn equality_ignores_trailing_zero_words() {
        let a = CpuSet::from_cpus([3]);
        let b = CpuSet::from_words(&[0b1000, 0, 0]);
        assert_eq!(a, b);
        assert_eq!(b.words().len(), 1);
    }

    #[test]
    fn singlify_keeps_lowest() {
        let mut set = CpuSet::from_cpus([4, 5, 70]);
        set.singlify();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn singlify_of_empty_is_empty() {
        let mut set = CpuSet::new();
        set.singlify();
        assert!(set.is_empty());
    }

    #[test]
    fn subset_and_intersection() {
        let all = CpuSet::from_cpus(0..8);
        let some = CpuSet::from_cpus([2, 3]);
        let other = CpuSet::from_cpus([9]);
        assert!(some.is_subset(&all));
        assert!(!all.is_subset(&some));
        assert!(some.intersects(&all));
        assert!(!other.intersects(&all));
    }

    #[test]
    fn cpulist_parsing() {
        let set = CpuSet::from_cpulist("0-3,8,10-11\n").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 8, 10, 11]);
        assert!(CpuSet::from_cpulist("3-1").is_err());
        assert!(CpuSet::from_cpulist("x").is_err());
        assert!(CpuSet::from_cpulist("").unwrap().is_empty());
    }

    #[test]
    fn cpulist_display() {
        let set = CpuSet::from_cpus([0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(set.to_string(), "0-3,8,10-11");
        assert_eq!(CpuSet::new().to_string(), "");
    }
}
