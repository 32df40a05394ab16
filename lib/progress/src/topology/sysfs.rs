// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Linux topology platform backed by sysfs and `sched_{get,set}affinity`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sched;
use nix::unistd::Pid;

use super::{CpuSet, Platform, TOPOLOGY_API_VERSION};

/// Topology facilities read from `/sys` with affinity syscalls via
/// `nix`.
pub struct SysfsTopology {
    root: PathBuf,
}

impl SysfsTopology {
    /// Platform rooted at the host's `/sys`.
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/sys"),
        }
    }

    fn cpulist(&self, relative: &str) -> Result<CpuSet> {
        let path = self.root.join(relative);
        read_cpulist(&path)
    }

    /// Hardware threads sharing a core with `cpu`. Newer kernels expose
    /// `core_cpus_list`; older ones call it `thread_siblings_list`.
    fn core_siblings(&self, cpu: usize) -> Result<CpuSet> {
        let topo = format!("devices/system/cpu/cpu{cpu}/topology");
        self.cpulist(&format!("{topo}/core_cpus_list"))
            .or_else(|_| self.cpulist(&format!("{topo}/thread_siblings_list")))
    }
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SysfsTopology {
    fn api_version(&self) -> u32 {
        TOPOLOGY_API_VERSION
    }

    fn current_thread_binding(&self) -> Result<CpuSet> {
        let affinity =
            sched::sched_getaffinity(Pid::from_raw(0)).context("sched_getaffinity failed")?;
        let mut cpus = CpuSet::new();
        for cpu in 0..sched::CpuSet::count() {
            if affinity.is_set(cpu).unwrap_or(false) {
                cpus.set(cpu);
            }
        }
        Ok(cpus)
    }

    fn numa_cpus(&self, cpus: &CpuSet) -> Result<CpuSet> {
        let nodes = self.root.join("devices/system/node");
        let mut node_ids: Vec<usize> = fs::read_dir(&nodes)
            .with_context(|| format!("reading {}", nodes.display()))?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name();
                name.to_str()?.strip_prefix("node")?.parse().ok()
            })
            .collect();
        node_ids.sort_unstable();

        // The projection onto the node set is singlified: the first node
        // intersecting the input wins.
        for node in node_ids {
            let node_cpus = self.cpulist(&format!("devices/system/node/node{node}/cpulist"))?;
            if node_cpus.intersects(cpus) {
                return Ok(node_cpus);
            }
        }
        Ok(CpuSet::new())
    }

    fn device_local_cpus(&self, device: i32) -> Result<CpuSet> {
        self.cpulist(&format!("class/drm/card{device}/device/local_cpulist"))
            .with_context(|| format!("no local cpulist for device {device}"))
    }

    fn cores(&self, cpus: &CpuSet) -> Result<Vec<CpuSet>> {
        let mut cores: Vec<CpuSet> = Vec::new();
        for cpu in cpus.iter() {
            let siblings = self.core_siblings(cpu)?;
            // A core counts only when all of its hardware threads are in
            // the set; the first sibling discovers it.
            if siblings.iter().next() != Some(cpu) || !siblings.is_subset(cpus) {
                continue;
            }
            cores.push(siblings);
        }
        Ok(cores)
    }

    fn bind_current_thread(&self, cpus: &CpuSet) -> Result<()> {
        let mut target = sched::CpuSet::new();
        for cpu in cpus.iter() {
            target
                .set(cpu)
                .with_context(|| format!("cpu {cpu} outside the bindable range"))?;
        }
        sched::sched_setaffinity(Pid::from_raw(0), &target).context("sched_setaffinity failed")?;
        Ok(())
    }
}

fn read_cpulist(path: &Path) -> Result<CpuSet> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    CpuSet::from_cpulist(&raw).with_context(|| format!("parsing {}", path.display()))
}
