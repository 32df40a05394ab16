// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Structured per-operation trace records.
//!
//! When tracing is enabled, the worker records one [`TracePoint::Start`]
//! event when an operation enters the pipeline and one
//! [`TracePoint::Done`] event when it completes. Records accumulate in a
//! sink that callers drain; they serialize to JSON for offline analysis.

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::state::OpState;

/// Which side of an operation's lifetime a record marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePoint {
    /// The operation entered stage 0 and `start()` ran.
    Start,
    /// The operation returned `Complete` and was released.
    Done,
}

/// One trace record.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    /// Operation name.
    pub op: String,
    /// Raw compute-stream handle bits.
    pub stream: usize,
    /// Start or done.
    pub point: TracePoint,
    /// Microseconds since the sink was created.
    pub at_micros: u64,
}

/// Accumulates trace records from the worker thread.
pub struct TraceSink {
    epoch: Instant,
    records: Mutex<Vec<TraceRecord>>,
}

impl TraceSink {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, state: &dyn OpState, point: TracePoint) {
        let at_micros = self.epoch.elapsed().as_micros() as u64;
        self.records.lock().push(TraceRecord {
            op: state.name().to_string(),
            stream: state.compute_stream().raw(),
            point,
            at_micros,
        });
    }

    /// Take every record accumulated so far.
    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}
