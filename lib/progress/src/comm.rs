// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Seam to the MPI-like wrapper used for peer discovery.
//!
//! Bind planning needs to know this rank's position among same-host
//! peers and to run two small collectives over machine words. The
//! launcher-provided wrapper implements [`PeerComm`] over its local
//! communicator; [`SoloComm`] covers single-process operation, where
//! every collective is the identity.

use anyhow::{ensure, Result};

/// Peer coordination over the same-host (local) communicator.
pub trait PeerComm: Send + Sync {
    /// This process's rank in the world communicator. Used only to
    /// prefix diagnostics and to stagger the hang-check deadline.
    fn rank(&self) -> usize;

    /// This process's rank within the local communicator.
    fn local_rank(&self) -> usize;

    /// Number of ranks in the local communicator.
    fn local_size(&self) -> usize;

    /// Gather one word from every local rank, in local-rank order.
    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>>;

    /// Gather a variable-length word slice from every local rank,
    /// concatenated in local-rank order. `counts[i]` is the number of
    /// words contributed by local rank `i`.
    fn allgatherv_u64(&self, words: &[u64], counts: &[usize]) -> Result<Vec<u64>>;
}

/// Single-process communicator: one rank, identity collectives.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloComm;

impl PeerComm for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn local_rank(&self) -> usize {
        0
    }

    fn local_size(&self) -> usize {
        1
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>> {
        Ok(vec![value])
    }

    fn allgatherv_u64(&self, words: &[u64], counts: &[usize]) -> Result<Vec<u64>> {
        ensure!(
            counts.len() == 1 && counts[0] == words.len(),
            "allgatherv counts {counts:?} do not match contribution of {} words",
            words.len()
        );
        Ok(words.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_collectives_are_identity() {
        let comm = SoloComm;
        assert_eq!(comm.local_size(), 1);
        assert_eq!(comm.allgather_u64(9).unwrap(), vec![9]);
        assert_eq!(
            comm.allgatherv_u64(&[1, 2, 3], &[3]).unwrap(),
            vec![1, 2, 3]
        );
        assert!(comm.allgatherv_u64(&[1, 2], &[3]).is_err());
    }
}
