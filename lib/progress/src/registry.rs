// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Submission registry: maps compute streams to input queues.
//!
//! Queue slots are a fixed-capacity array allocated up front; a slot is
//! claimed for a new stream by writing the stream identity into it and
//! then publishing with a release-increment of the slot counter. Readers
//! acquire-load the counter before scanning, which guarantees they see
//! the stream identity of every published slot. Slots are append-only:
//! once published, a slot's stream never changes, so indices cached in
//! thread-local storage stay valid for the registry's lifetime.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::queue::InputQueue;
use crate::state::ComputeStream;

/// Monotonic registry identity, used to key the thread-local cache so
/// two engines in one process cannot alias each other's entries.
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static STREAM_CACHE: RefCell<HashMap<(u64, usize), usize>> = RefCell::new(HashMap::new());
}

pub(crate) struct StreamRegistry {
    slots: Box<[InputQueue]>,
    /// Number of published slots. Release-incremented by writers,
    /// acquire-loaded by readers.
    published: AtomicUsize,
    grow: Mutex<()>,
    cache_enabled: bool,
    registry_id: u64,
}

impl StreamRegistry {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        let slots: Box<[InputQueue]> = (0..config.max_streams)
            .map(|_| InputQueue::unpublished())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let published = if config.add_default_stream {
            slots[0].set_stream(ComputeStream::DEFAULT);
            1
        } else {
            0
        };
        Self {
            slots,
            published: AtomicUsize::new(published),
            grow: Mutex::new(()),
            cache_enabled: config.stream_queue_cache,
            registry_id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of published queue slots.
    pub(crate) fn len(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    /// A published queue by slot index. Callers must have observed
    /// `index < self.len()`.
    pub(crate) fn queue(&self, index: usize) -> &InputQueue {
        &self.slots[index]
    }

    /// Find or create the input queue for `stream`.
    ///
    /// Steady-state submissions are lock-free: a thread-local cache hit
    /// or a linear scan of the published slots. Only the first
    /// submission for a new stream takes the growth mutex.
    pub(crate) fn queue_for(&self, stream: ComputeStream) -> Result<&InputQueue, EngineError> {
        if self.cache_enabled {
            let cached = STREAM_CACHE
                .with(|cache| cache.borrow().get(&(self.registry_id, stream.raw())).copied());
            if let Some(index) = cached {
                return Ok(&self.slots[index]);
            }
        }

        let published = self.published.load(Ordering::Acquire);
        if let Some(index) = self.scan(0, published, stream) {
            self.remember(stream, index);
            return Ok(&self.slots[index]);
        }

        // Slot not found; claim one under the growth mutex. Another
        // submitter may have added the queue while we scanned, so only
        // the slots published since then need re-checking.
        let guard = self.grow.lock();
        let republished = self.published.load(Ordering::Acquire);
        if let Some(index) = self.scan(published, republished, stream) {
            drop(guard);
            self.remember(stream, index);
            return Ok(&self.slots[index]);
        }

        if republished == self.slots.len() {
            return Err(EngineError::TooManyStreams {
                capacity: self.slots.len(),
            });
        }

        self.slots[republished].set_stream(stream);
        // Publish: any reader that observes the new count also sees the
        // stream identity written above.
        self.published.store(republished + 1, Ordering::Release);
        drop(guard);

        self.remember(stream, republished);
        Ok(&self.slots[republished])
    }

    fn scan(&self, from: usize, to: usize, stream: ComputeStream) -> Option<usize> {
        (from..to).find(|&i| self.slots[i].stream() == stream)
    }

    fn remember(&self, stream: ComputeStream, index: usize) {
        if self.cache_enabled {
            STREAM_CACHE.with(|cache| {
                cache
                    .borrow_mut()
                    .insert((self.registry_id, stream.raw()), index);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max_streams: usize, add_default: bool, cache: bool) -> StreamRegistry {
        StreamRegistry::new(&EngineConfig {
            max_streams,
            add_default_stream: add_default,
            stream_queue_cache: cache,
            ..Default::default()
        })
    }

    #[test]
    fn fresh_stream_creates_one_slot() {
        let registry = registry(4, false, false);
        assert_eq!(registry.len(), 0);

        let stream = ComputeStream::from_raw(0x10);
        registry.queue_for(stream).unwrap();
        assert_eq!(registry.len(), 1);

        // Second lookup reuses the slot.
        registry.queue_for(stream).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.queue(0).stream(), stream);
    }

    #[test]
    fn default_stream_occupies_slot_zero() {
        let registry = registry(4, true, false);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.queue(0).stream(), ComputeStream::DEFAULT);

        // Submitting on the default stream does not grow the registry.
        registry.queue_for(ComputeStream::DEFAULT).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_overflow_is_a_config_error() {
        let registry = registry(2, false, false);
        registry.queue_for(ComputeStream::from_raw(1)).unwrap();
        registry.queue_for(ComputeStream::from_raw(2)).unwrap();
        let err = registry.queue_for(ComputeStream::from_raw(3)).unwrap_err();
        assert_eq!(err, EngineError::TooManyStreams { capacity: 2 });
        // Existing streams still resolve.
        registry.queue_for(ComputeStream::from_raw(2)).unwrap();
    }

    #[test]
    fn cached_lookup_hits_the_same_slot() {
        let registry = registry(4, false, true);
        let stream = ComputeStream::from_raw(0xabc);
        let first = registry.queue_for(stream).unwrap() as *const InputQueue;
        let second = registry.queue_for(stream).unwrap() as *const InputQueue;
        assert_eq!(first, second);
    }

    #[test]
    fn racing_submitters_create_one_slot() {
        use std::sync::Arc;

        let registry = Arc::new(registry(8, false, false));
        let stream = ComputeStream::from_raw(0x42);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.queue_for(stream).map(|q| q as *const InputQueue as usize)
                })
            })
            .collect();
        let mut seen = Vec::new();
        for handle in threads {
            seen.push(handle.join().unwrap().unwrap());
        }
        assert_eq!(registry.len(), 1);
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
    }
}
