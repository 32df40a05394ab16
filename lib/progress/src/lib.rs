// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Progress engine for GPU-aware collective communication.
//!
//! Application threads submit asynchronous collective operations, each
//! tied to a compute stream; a dedicated worker thread drives them
//! through a per-stream, fixed-depth pipeline until completion, without
//! blocking submitters and without stalling unrelated streams. The
//! worker binds itself to a CPU core near the GPU it serves, coordinated
//! with the other ranks on the host.
//!
//! The concrete collectives stay outside this crate: they plug in
//! through the [`OpState`] contract and are otherwise opaque. The same
//! goes for the MPI wrapper ([`comm::PeerComm`]), the topology
//! facilities ([`topology::Platform`]), and the GPU runtime
//! ([`gpu::DeviceRuntime`]).
//!
//! ```no_run
//! use pulse_progress::{EngineConfig, ProgressEngine};
//!
//! let engine = ProgressEngine::builder()
//!     .config(EngineConfig::default())
//!     .build()?;
//! engine.run()?;
//! // engine.enqueue(state)? for each submitted operation ...
//! engine.stop()?;
//! # Ok::<(), pulse_progress::EngineError>(())
//! ```

pub mod comm;
pub mod config;
pub mod error;
pub mod gpu;
pub mod logging;
pub mod testing;
pub mod topology;
pub mod trace;

mod engine;
mod pipeline;
mod queue;
mod registry;
mod state;

pub use config::EngineConfig;
pub use engine::{ProgressEngine, ProgressEngineBuilder};
pub use error::EngineError;
pub use state::{ComputeStream, OpState, RunType, StepAction};
pub use trace::{TracePoint, TraceRecord};
