// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Progress engine configuration.
//!
//! Every knob has a `PULSE_*` environment override picked up by
//! [`EngineConfig::from_env`]; explicit construction wins for embedders
//! that manage their own configuration.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default maximum number of distinct compute streams.
pub const DEFAULT_MAX_STREAMS: usize = 64;

/// Default pipeline depth.
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

/// Default admission ceiling for bounded operations.
pub const DEFAULT_CONCURRENT_OPS: usize = 4;

/// Tunable configuration for [`ProgressEngine`](crate::ProgressEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of distinct compute streams. Submitting more is a
    /// fatal configuration error (`PULSE_MAX_STREAMS`).
    pub max_streams: usize,

    /// Number of pipeline stages per stream. Advancing past the last
    /// stage is a fatal configuration error (`PULSE_PIPELINE_DEPTH`).
    pub pipeline_depth: usize,

    /// Admission ceiling for bounded operations
    /// (`PULSE_CONCURRENT_OPS`). The ceiling is waived for a bounded
    /// operation whose stream has an empty first stage, so a full cap on
    /// other streams cannot deadlock a stream's head of line.
    pub concurrency_cap: usize,

    /// Start the engine from the first `enqueue` instead of requiring an
    /// explicit `run` (`PULSE_START_ON_DEMAND`).
    pub start_on_demand: bool,

    /// Cache stream-to-queue lookups in submitter thread-local storage
    /// (`PULSE_STREAM_QUEUE_CACHE`).
    pub stream_queue_cache: bool,

    /// Pre-populate slot 0 with the default compute stream at
    /// construction (`PULSE_ADD_DEFAULT_STREAM`).
    pub add_default_stream: bool,

    /// Warn once per operation that has been in flight longer than
    /// `10 + rank` seconds (`PULSE_HANG_CHECK`).
    pub hang_check: bool,

    /// Record structured start/done events per operation
    /// (`PULSE_TRACE`).
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            concurrency_cap: DEFAULT_CONCURRENT_OPS,
            start_on_demand: false,
            stream_queue_cache: true,
            add_default_stream: true,
            hang_check: false,
            trace: false,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the environment, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_streams: env_usize("PULSE_MAX_STREAMS", defaults.max_streams),
            pipeline_depth: env_usize("PULSE_PIPELINE_DEPTH", defaults.pipeline_depth),
            concurrency_cap: env_usize("PULSE_CONCURRENT_OPS", defaults.concurrency_cap),
            start_on_demand: env_flag("PULSE_START_ON_DEMAND", defaults.start_on_demand),
            stream_queue_cache: env_flag("PULSE_STREAM_QUEUE_CACHE", defaults.stream_queue_cache),
            add_default_stream: env_flag("PULSE_ADD_DEFAULT_STREAM", defaults.add_default_stream),
            hang_check: env_flag("PULSE_HANG_CHECK", defaults.hang_check),
            trace: env_flag("PULSE_TRACE", defaults.trace),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_streams == 0 {
            return Err(EngineError::InvalidConfig(
                "max_streams must be at least 1".to_string(),
            ));
        }
        if self.pipeline_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "pipeline_depth must be at least 1".to_string(),
            ));
        }
        if self.concurrency_cap == 0 {
            return Err(EngineError::InvalidConfig(
                "concurrency_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "on" | "yes"),
        Err(_) => default,
    }
}
