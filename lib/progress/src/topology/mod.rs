// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hardware topology: CPU sets, the platform seam, and bind planning.
//!
//! The progress worker wants to run on a CPU core near the GPU it
//! serves, shared with no other rank on the same host. The
//! [`Platform`] trait is the seam to the host's topology facilities;
//! [`binder`] combines it with the peer communicator to pick a core per
//! rank and to apply the binding from inside the worker thread.
//!
//! Binding is strictly best-effort: after the interface version check,
//! every failure in this module disables binding for the process and is
//! reported once, and the engine runs unbound.

mod cpuset;
#[cfg(target_os = "linux")]
mod sysfs;

pub(crate) mod binder;

pub use cpuset::CpuSet;
#[cfg(target_os = "linux")]
pub use sysfs::SysfsTopology;

use std::sync::Arc;

use anyhow::Result;

/// Version of the [`Platform`] interface this crate is built against.
///
/// Checked against [`Platform::api_version`] before any other topology
/// call; a mismatch is a fatal configuration error, mirroring the usual
/// contract of native topology libraries whose runtime must match the
/// headers they were compiled with.
pub const TOPOLOGY_API_VERSION: u32 = 1;

/// Host-topology facilities consumed by the bind planner.
pub trait Platform: Send + Sync {
    /// Interface version implemented by this platform.
    fn api_version(&self) -> u32;

    /// The calling thread's current CPU binding.
    fn current_thread_binding(&self) -> Result<CpuSet>;

    /// Project a CPU set onto its first NUMA node and back to the CPU
    /// set covering that node.
    fn numa_cpus(&self, cpus: &CpuSet) -> Result<CpuSet>;

    /// CPUs local to a GPU device.
    fn device_local_cpus(&self, device: i32) -> Result<CpuSet>;

    /// The cores fully contained in `cpus`, each as the set of its
    /// hardware threads, ordered by lowest hardware thread.
    fn cores(&self, cpus: &CpuSet) -> Result<Vec<CpuSet>>;

    /// Bind the calling thread to `cpus`.
    fn bind_current_thread(&self, cpus: &CpuSet) -> Result<()>;
}

/// Platform for hosts without affinity support. Yields an empty CPU
/// set, which disables binding; binding a thread is a no-op.
pub struct UnboundTopology;

impl Platform for UnboundTopology {
    fn api_version(&self) -> u32 {
        TOPOLOGY_API_VERSION
    }

    fn current_thread_binding(&self) -> Result<CpuSet> {
        Ok(CpuSet::new())
    }

    fn numa_cpus(&self, _cpus: &CpuSet) -> Result<CpuSet> {
        Ok(CpuSet::new())
    }

    fn device_local_cpus(&self, _device: i32) -> Result<CpuSet> {
        Ok(CpuSet::new())
    }

    fn cores(&self, _cpus: &CpuSet) -> Result<Vec<CpuSet>> {
        Ok(Vec::new())
    }

    fn bind_current_thread(&self, _cpus: &CpuSet) -> Result<()> {
        Ok(())
    }
}

/// The default platform for this host.
pub fn host_platform() -> Arc<dyn Platform> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(SysfsTopology::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnboundTopology)
    }
}
