// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream pipeline scheduler.
//!
//! Every stream owns a fixed-depth array of stages; each stage holds an
//! ordered sequence of in-flight operations. A scheduler pass walks each
//! stage in two sub-passes:
//!
//! 1. **Forward pass**: step every non-paused entry. `Cont` leaves it in
//!    place. `Advance` moves it to the next stage if it is the head of
//!    its stage, otherwise marks it paused. `Complete` removes and drops
//!    it.
//! 2. **Drain pass**: while the head of the stage is paused, clear the
//!    flag and move it to the next stage.
//!
//! The pause-and-drain rule preserves per-stream order across stage
//! transitions: an operation only advances once everything ahead of it
//! in its stage has advanced or completed. Stages are processed deepest
//! first so an advancing operation is stepped at most once per pass.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineError;
use crate::state::{ComputeStream, OpState, RunType, StepAction};
use crate::trace::{TracePoint, TraceSink};

struct InFlight {
    state: Box<dyn OpState>,
    /// Set when the operation asked to advance while not at the head of
    /// its stage. Paused operations are never stepped; the drain pass
    /// clears the flag once the operation reaches the head.
    paused_for_advance: bool,
    started_at: Instant,
    hang_reported: bool,
}

struct StreamPipeline {
    stages: Vec<VecDeque<InFlight>>,
}

impl StreamPipeline {
    fn new(depth: usize) -> Self {
        Self {
            stages: (0..depth).map(|_| VecDeque::new()).collect(),
        }
    }
}

pub(crate) struct Scheduler {
    pipelines: HashMap<ComputeStream, StreamPipeline>,
    /// Bounded operations currently anywhere in any pipeline. Worker
    /// thread only.
    num_bounded: usize,
    depth: usize,
    concurrency_cap: usize,
    hang_check: bool,
    rank: usize,
    trace: Option<Arc<TraceSink>>,
}

impl Scheduler {
    pub(crate) fn new(
        depth: usize,
        concurrency_cap: usize,
        hang_check: bool,
        rank: usize,
        trace: Option<Arc<TraceSink>>,
    ) -> Self {
        Self {
            pipelines: HashMap::new(),
            num_bounded: 0,
            depth,
            concurrency_cap,
            hang_check,
            rank,
            trace,
        }
    }

    /// Admission decision for the head of an input queue.
    ///
    /// Unbounded operations always pass. A bounded operation passes when
    /// the cap has room, or when its stream's pipeline is absent or has
    /// an empty first stage: a full cap of bounded operations on other
    /// streams must not starve this stream's head of line.
    pub(crate) fn admits(&self, head: &dyn OpState) -> bool {
        match head.run_type() {
            RunType::Unbounded => true,
            RunType::Bounded => {
                self.num_bounded < self.concurrency_cap
                    || self
                        .pipelines
                        .get(&head.compute_stream())
                        .map_or(true, |row| row.stages[0].is_empty())
            }
        }
    }

    /// Move an admitted operation into stage 0 of its stream and start
    /// it. Creates the stream's pipeline on first use.
    pub(crate) fn launch(&mut self, mut state: Box<dyn OpState>) {
        if state.run_type() == RunType::Bounded {
            self.num_bounded += 1;
        }
        let stream = state.compute_stream();
        let depth = self.depth;
        let row = self
            .pipelines
            .entry(stream)
            .or_insert_with(|| StreamPipeline::new(depth));
        state.start();
        if let Some(trace) = &self.trace {
            trace.record(state.as_ref(), TracePoint::Start);
        }
        row.stages[0].push_back(InFlight {
            state,
            paused_for_advance: false,
            started_at: Instant::now(),
            hang_reported: false,
        });
    }

    /// One scheduler pass over every stream and stage.
    pub(crate) fn step_all(&mut self) -> Result<(), EngineError> {
        let depth = self.depth;
        let hang_check = self.hang_check;
        let rank = self.rank;
        for pipeline in self.pipelines.values_mut() {
            for s in (0..depth).rev() {
                let (head, tail) = pipeline.stages.split_at_mut(s + 1);
                let stage = &mut head[s];
                let mut next = tail.first_mut();

                let mut idx = 0;
                while idx < stage.len() {
                    if stage[idx].paused_for_advance {
                        idx += 1;
                        continue;
                    }
                    match stage[idx].state.step() {
                        StepAction::Cont => {
                            if hang_check {
                                report_hang(&mut stage[idx], rank);
                            }
                            idx += 1;
                        }
                        StepAction::Advance => {
                            let Some(next) = next.as_deref_mut() else {
                                return Err(EngineError::PipelineOverrun {
                                    op: stage[idx].state.name().to_string(),
                                    depth,
                                });
                            };
                            if idx == 0 {
                                if let Some(entry) = stage.pop_front() {
                                    next.push_back(entry);
                                }
                            } else {
                                stage[idx].paused_for_advance = true;
                                idx += 1;
                            }
                        }
                        StepAction::Complete => {
                            if let Some(entry) = stage.remove(idx) {
                                if entry.state.run_type() == RunType::Bounded {
                                    self.num_bounded -= 1;
                                }
                                if let Some(trace) = &self.trace {
                                    trace.record(entry.state.as_ref(), TracePoint::Done);
                                }
                            }
                        }
                    }
                }

                if let Some(next) = next {
                    while stage.front().map_or(false, |e| e.paused_for_advance) {
                        if let Some(mut entry) = stage.pop_front() {
                            entry.paused_for_advance = false;
                            next.push_back(entry);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// True when no operation is in any pipeline.
    pub(crate) fn is_idle(&self) -> bool {
        self.pipelines
            .values()
            .all(|row| row.stages.iter().all(VecDeque::is_empty))
    }

    /// Diagnostic dump of every pipeline row. Reads scheduler state
    /// as-is; meaningful only while the worker is quiescent.
    pub(crate) fn dump<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        for (stream, row) in &self.pipelines {
            writeln!(out, "Pipelined run queue for stream {stream:?}:")?;
            for (s, stage) in row.stages.iter().enumerate() {
                writeln!(out, "Stage {s} run queue ({}):", stage.len())?;
                for (i, entry) in stage.iter().enumerate() {
                    writeln!(out, "{i}: {} {}", entry.state.name(), entry.state.desc())?;
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn stage_labels(&self, stream: ComputeStream, stage: usize) -> Vec<String> {
        self.pipelines
            .get(&stream)
            .map(|row| {
                row.stages[stage]
                    .iter()
                    .map(|e| e.state.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn paused_labels(&self, stream: ComputeStream, stage: usize) -> Vec<String> {
        self.pipelines
            .get(&stream)
            .map(|row| {
                row.stages[stage]
                    .iter()
                    .filter(|e| e.paused_for_advance)
                    .map(|e| e.state.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn bounded_in_flight(&self) -> usize {
        self.num_bounded
    }
}

/// Warn once per operation that has been in flight beyond `10 + rank`
/// seconds. The rank stagger keeps a node-wide hang from emitting one
/// warning per rank in the same instant.
fn report_hang(entry: &mut InFlight, rank: usize) {
    if entry.hang_reported {
        return;
    }
    let limit = std::time::Duration::from_secs(10 + rank as u64);
    if entry.started_at.elapsed() > limit {
        tracing::warn!(
            rank,
            op = entry.state.name(),
            stream = ?entry.state.compute_stream(),
            run_type = ?entry.state.run_type(),
            "progress engine detected a possible hang"
        );
        entry.hang_reported = true;
    }
}
