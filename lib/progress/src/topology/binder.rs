// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bind planning: pick one core per local rank, near the GPU.
//!
//! Ranks on one host may report identical CPU sets (same GPU locality
//! domain) or disjoint ones. Each rank serializes its CPU set as machine
//! words and the local communicator runs two collective exchanges: an
//! allgather of word counts, then an allgatherv of the concatenated
//! masks. A rank's offset is the number of lower local ranks holding an
//! identical set; ranks with distinct sets are assumed non-overlapping
//! and contribute nothing. Cores are then assigned from the top of the
//! set downward, `core_to_bind = num_cores - offset - 1`, which biases
//! rank 0 toward the last core of its set, empirically the one farthest
//! from user compute.

use anyhow::Result;

use crate::comm::PeerComm;
use crate::error::EngineError;
use crate::topology::{CpuSet, Platform, TOPOLOGY_API_VERSION};

/// The core chosen for this rank, computed once before the worker
/// starts and applied from inside the worker thread.
#[derive(Debug)]
pub(crate) struct BindPlan {
    core: Option<usize>,
}

impl BindPlan {
    pub(crate) fn disabled() -> Self {
        Self { core: None }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> Option<usize> {
        self.core
    }

    /// Compute the bind plan for this rank.
    ///
    /// A topology interface version mismatch and peer-exchange failures
    /// are fatal. Every other failure disables binding for the process:
    /// one warning, and the engine runs unbound.
    pub(crate) fn compute(
        platform: &dyn Platform,
        comm: &dyn PeerComm,
        device: Option<i32>,
    ) -> Result<Self, EngineError> {
        let runtime = platform.api_version();
        if runtime != TOPOLOGY_API_VERSION {
            return Err(EngineError::TopologyVersionMismatch {
                runtime,
                supported: TOPOLOGY_API_VERSION,
            });
        }

        let rank = comm.rank();
        let cpuset = match starting_cpuset(platform, device) {
            Ok(cpuset) => cpuset,
            Err(err) => {
                tracing::warn!(rank, err = format!("{err:#}"), "could not get starting cpu set; not binding progress worker");
                return Ok(Self::disabled());
            }
        };
        if cpuset.is_empty() {
            tracing::warn!(rank, "empty starting cpu set; not binding progress worker");
            return Ok(Self::disabled());
        }

        let peers = exchange_cpusets(comm, &cpuset)?;
        let offset = bind_offset(&peers, &cpuset, comm.local_rank());

        let cores = match platform.cores(&cpuset) {
            Ok(cores) => cores,
            Err(err) => {
                tracing::warn!(rank, err = format!("{err:#}"), "could not enumerate cores; not binding progress worker");
                return Ok(Self::disabled());
            }
        };
        if cores.is_empty() {
            tracing::warn!(rank, cpus = %cpuset, "no cores in cpu set; not binding progress worker");
            return Ok(Self::disabled());
        }
        if offset >= cores.len() {
            tracing::warn!(
                rank,
                offset,
                num_cores = cores.len(),
                "core offset exceeds available cores; not binding progress worker"
            );
            return Ok(Self::disabled());
        }

        Ok(Self {
            core: Some(cores.len() - offset - 1),
        })
    }

    /// Apply the plan to the calling thread. Failures leave the worker
    /// unbound; the plan being disabled is silent (already reported at
    /// compute time).
    pub(crate) fn apply(&self, platform: &dyn Platform, device: Option<i32>, rank: usize) {
        let Some(core_index) = self.core else {
            return;
        };

        let cpuset = match starting_cpuset(platform, device) {
            Ok(cpuset) if !cpuset.is_empty() => cpuset,
            _ => {
                tracing::warn!(rank, "could not recompute cpu set; progress worker left unbound");
                return;
            }
        };
        let cores = match platform.cores(&cpuset) {
            Ok(cores) => cores,
            Err(err) => {
                tracing::warn!(rank, err = format!("{err:#}"), "could not enumerate cores; progress worker left unbound");
                return;
            }
        };
        let Some(core) = cores.get(core_index) else {
            tracing::warn!(rank, core_index, "core missing from cpu set; progress worker left unbound");
            return;
        };

        let mut target = core.clone();
        target.singlify();
        match platform.bind_current_thread(&target) {
            Ok(()) => tracing::debug!(rank, core = %target, "bound progress worker"),
            Err(err) => {
                tracing::warn!(rank, err = format!("{err:#}"), "failed to bind progress worker");
            }
        }
    }
}

/// The CPU set this rank wants to bind within: the GPU's locality
/// domain when a device is known, otherwise the NUMA node covering the
/// thread's current binding.
fn starting_cpuset(platform: &dyn Platform, device: Option<i32>) -> Result<CpuSet> {
    match device {
        Some(device) => platform.device_local_cpus(device),
        None => {
            let current = platform.current_thread_binding()?;
            platform.numa_cpus(&current)
        }
    }
}

/// Gather every local rank's CPU set, in local-rank order.
fn exchange_cpusets(comm: &dyn PeerComm, cpuset: &CpuSet) -> Result<Vec<CpuSet>, EngineError> {
    let words = cpuset.words();
    let lens = comm
        .allgather_u64(words.len() as u64)
        .map_err(|err| EngineError::PeerExchange(format!("{err:#}")))?;
    let counts: Vec<usize> = lens.iter().map(|&len| len as usize).collect();
    let gathered = comm
        .allgatherv_u64(words, &counts)
        .map_err(|err| EngineError::PeerExchange(format!("{err:#}")))?;

    let total: usize = counts.iter().sum();
    if gathered.len() != total {
        return Err(EngineError::PeerExchange(format!(
            "gathered {} words, expected {total}",
            gathered.len()
        )));
    }

    let mut peers = Vec::with_capacity(counts.len());
    let mut cursor = 0;
    for count in counts {
        peers.push(CpuSet::from_words(&gathered[cursor..cursor + count]));
        cursor += count;
    }
    Ok(peers)
}

/// This rank's offset among local ranks holding an identical CPU set.
fn bind_offset(peers: &[CpuSet], mine: &CpuSet, local_rank: usize) -> usize {
    peers
        .iter()
        .take(local_rank)
        .filter(|peer| *peer == mine)
        .count()
}
