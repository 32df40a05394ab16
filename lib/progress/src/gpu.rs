// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Seam to the GPU runtime.
//!
//! The engine needs exactly two things from the GPU runtime: the device
//! current at construction, and the ability to make the worker thread
//! current on that device before any operation starts. Everything else
//! about the GPU is the concern of the operation states themselves.

use std::sync::Arc;

use anyhow::Result;

/// Device get/set for the GPU runtime in use.
pub trait DeviceRuntime: Send + Sync {
    /// The device current on the calling thread, or `None` when no GPU
    /// runtime is active.
    fn current_device(&self) -> Result<Option<i32>>;

    /// Make `device` current on the calling thread.
    fn set_device(&self, device: i32) -> Result<()>;
}

/// GPU-less runtime: no device to capture, setting is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevice;

impl DeviceRuntime for NoDevice {
    fn current_device(&self) -> Result<Option<i32>> {
        Ok(None)
    }

    fn set_device(&self, _device: i32) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "cuda")]
pub use cuda::CudaDeviceRuntime;

#[cfg(feature = "cuda")]
mod cuda {
    use anyhow::{bail, Result};
    use cudarc::runtime::sys as cuda_runtime;

    use super::DeviceRuntime;

    /// CUDA runtime device control.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CudaDeviceRuntime;

    impl DeviceRuntime for CudaDeviceRuntime {
        fn current_device(&self) -> Result<Option<i32>> {
            let mut device = 0i32;
            let status = unsafe { cuda_runtime::cudaGetDevice(&mut device) };
            if status != cuda_runtime::cudaError::cudaSuccess {
                bail!("cudaGetDevice failed: {status:?}");
            }
            Ok(Some(device))
        }

        fn set_device(&self, device: i32) -> Result<()> {
            let status = unsafe { cuda_runtime::cudaSetDevice(device) };
            if status != cuda_runtime::cudaError::cudaSuccess {
                bail!("cudaSetDevice({device}) failed: {status:?}");
            }
            Ok(())
        }
    }
}

/// The default device runtime for this build.
pub fn host_runtime() -> Arc<dyn DeviceRuntime> {
    #[cfg(feature = "cuda")]
    {
        Arc::new(CudaDeviceRuntime)
    }
    #[cfg(not(feature = "cuda"))]
    {
        Arc::new(NoDevice)
    }
}
