// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the progress engine.
//!
//! Configuration, lifecycle-misuse, and peer-exchange failures are fatal
//! and surface as [`EngineError`]. Topology failures are not represented
//! here: they disable binding for the process and are reported once via
//! `tracing`, never propagated.

/// Fatal errors raised by the progress engine.
///
/// Errors detected on the worker thread (see [`PipelineOverrun`]) halt
/// the worker and are surfaced by `ProgressEngine::stop` and
/// `ProgressEngine::fault`.
///
/// [`PipelineOverrun`]: EngineError::PipelineOverrun
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A submission named more distinct compute streams than the engine
    /// was configured for.
    #[error("progress engine supports at most {capacity} distinct compute streams")]
    TooManyStreams {
        /// Configured stream capacity.
        capacity: usize,
    },

    /// An operation returned `Advance` from the last pipeline stage.
    #[error("operation '{op}' tried to advance past the last pipeline stage (depth {depth})")]
    PipelineOverrun {
        /// Name of the offending operation.
        op: String,
        /// Configured pipeline depth.
        depth: usize,
    },

    /// `stop` was called on an engine that is already stopping.
    #[error("stop() called twice on progress engine")]
    StopTwice,

    /// `run` was called after the engine was stopped.
    #[error("run() called on a stopped progress engine")]
    RunAfterStop,

    /// The topology platform reports an interface version other than the
    /// one this crate targets.
    #[error("topology interface version {runtime} does not match supported version {supported}")]
    TopologyVersionMismatch {
        /// Version reported by the platform at runtime.
        runtime: u32,
        /// Version this crate was built against.
        supported: u32,
    },

    /// The peer-wise CPU-set exchange failed in the communication layer.
    #[error("peer CPU-set exchange failed: {0}")]
    PeerExchange(String),

    /// The engine configuration failed validation.
    #[error("invalid progress engine configuration: {0}")]
    InvalidConfig(String),

    /// The worker thread could not be spawned.
    #[error("failed to spawn progress worker: {0}")]
    WorkerSpawn(String),
}
