// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the engine's collaborator seams.
//!
//! Used by the crate's own unit and integration suites, and exported so
//! embedders can drive the engine hermetically: a scripted operation
//! state with an observable event log, a canned topology platform, and
//! a canned multi-rank communicator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use parking_lot::Mutex;

use crate::comm::PeerComm;
use crate::state::{ComputeStream, OpState, RunType, StepAction};
use crate::topology::{CpuSet, Platform, TOPOLOGY_API_VERSION};

/// An observable event from a [`ScriptedOp`]'s lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpEvent {
    /// `start()` ran.
    Started(String),
    /// `step()` ran.
    Stepped(String),
    /// The state was dropped after returning `Complete`.
    Completed(String),
}

/// Shared, ordered log of operation events.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<OpEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: OpEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<OpEvent> {
        self.events.lock().clone()
    }

    /// Position of the first occurrence of `event`.
    pub fn position(&self, event: &OpEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// Whether `event` has been recorded.
    pub fn contains(&self, event: &OpEvent) -> bool {
        self.position(event).is_some()
    }

    /// Labels of completed operations, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OpEvent::Completed(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Labels of started operations, in start order.
    pub fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OpEvent::Started(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

/// An operation state driven by a fixed plan of step actions.
///
/// Each `step()` consumes the next action; the plan should end with
/// [`StepAction::Complete`]. Start, step, and drop-after-complete are
/// recorded in the shared [`EventLog`].
pub struct ScriptedOp {
    label: String,
    stream: ComputeStream,
    run_type: RunType,
    plan: VecDeque<StepAction>,
    done: bool,
    log: Arc<EventLog>,
}

impl ScriptedOp {
    pub fn new(
        label: &str,
        stream: ComputeStream,
        run_type: RunType,
        plan: Vec<StepAction>,
        log: &Arc<EventLog>,
    ) -> Box<Self> {
        Box::new(Self {
            label: label.to_string(),
            stream,
            run_type,
            plan: plan.into(),
            done: false,
            log: Arc::clone(log),
        })
    }

    pub fn bounded(
        label: &str,
        stream: ComputeStream,
        plan: Vec<StepAction>,
        log: &Arc<EventLog>,
    ) -> Box<Self> {
        Self::new(label, stream, RunType::Bounded, plan, log)
    }

    pub fn unbounded(
        label: &str,
        stream: ComputeStream,
        plan: Vec<StepAction>,
        log: &Arc<EventLog>,
    ) -> Box<Self> {
        Self::new(label, stream, RunType::Unbounded, plan, log)
    }

    /// A plan that continues `conts` times and then completes.
    pub fn cont_then_complete(conts: usize) -> Vec<StepAction> {
        let mut plan = vec![StepAction::Cont; conts];
        plan.push(StepAction::Complete);
        plan
    }
}

impl OpState for ScriptedOp {
    fn compute_stream(&self) -> ComputeStream {
        self.stream
    }

    fn run_type(&self) -> RunType {
        self.run_type
    }

    fn start(&mut self) {
        self.log.record(OpEvent::Started(self.label.clone()));
    }

    fn step(&mut self) -> StepAction {
        self.log.record(OpEvent::Stepped(self.label.clone()));
        let action = self.plan.pop_front().unwrap_or(StepAction::Cont);
        if action == StepAction::Complete {
            self.done = true;
        }
        action
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn desc(&self) -> String {
        format!("scripted, {} steps left", self.plan.len())
    }
}

impl Drop for ScriptedOp {
    fn drop(&mut self) {
        if self.done {
            self.log.record(OpEvent::Completed(self.label.clone()));
        }
    }
}

/// A topology platform with canned answers and a bind counter.
pub struct StaticTopology {
    api_version: u32,
    cpuset: CpuSet,
    cores: Vec<CpuSet>,
    bind_calls: AtomicUsize,
    bound: Mutex<Vec<CpuSet>>,
}

impl StaticTopology {
    /// Platform answering every locality query with `cpuset` and
    /// reporting `cores` inside it.
    pub fn new(cpuset: CpuSet, cores: Vec<CpuSet>) -> Self {
        Self {
            api_version: TOPOLOGY_API_VERSION,
            cpuset,
            cores,
            bind_calls: AtomicUsize::new(0),
            bound: Mutex::new(Vec::new()),
        }
    }

    /// Platform whose every CPU set is empty (binding gets disabled).
    pub fn empty() -> Self {
        Self::new(CpuSet::new(), Vec::new())
    }

    /// Override the reported interface version.
    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Number of `bind_current_thread` calls observed.
    pub fn bind_count(&self) -> usize {
        self.bind_calls.load(Ordering::SeqCst)
    }

    /// The CPU set most recently bound.
    pub fn last_bound(&self) -> Option<CpuSet> {
        self.bound.lock().last().cloned()
    }
}

impl Platform for StaticTopology {
    fn api_version(&self) -> u32 {
        self.api_version
    }

    fn current_thread_binding(&self) -> Result<CpuSet> {
        Ok(self.cpuset.clone())
    }

    fn numa_cpus(&self, cpus: &CpuSet) -> Result<CpuSet> {
        Ok(cpus.clone())
    }

    fn device_local_cpus(&self, _device: i32) -> Result<CpuSet> {
        Ok(self.cpuset.clone())
    }

    fn cores(&self, _cpus: &CpuSet) -> Result<Vec<CpuSet>> {
        Ok(self.cores.clone())
    }

    fn bind_current_thread(&self, cpus: &CpuSet) -> Result<()> {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);
        self.bound.lock().push(cpus.clone());
        Ok(())
    }
}

/// A communicator with a canned local-rank roster of CPU sets.
///
/// The collectives answer as if every local rank contributed its entry
/// of `peer_sets`.
pub struct FixedComm {
    rank: usize,
    local_rank: usize,
    peer_sets: Vec<CpuSet>,
}

impl FixedComm {
    pub fn new(rank: usize, local_rank: usize, peer_sets: Vec<CpuSet>) -> Self {
        assert!(local_rank < peer_sets.len());
        Self {
            rank,
            local_rank,
            peer_sets,
        }
    }
}

impl PeerComm for FixedComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn local_size(&self) -> usize {
        self.peer_sets.len()
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>> {
        ensure!(
            value == self.peer_sets[self.local_rank].words().len() as u64,
            "contribution does not match this rank's canned cpu set"
        );
        Ok(self
            .peer_sets
            .iter()
            .map(|set| set.words().len() as u64)
            .collect())
    }

    fn allgatherv_u64(&self, words: &[u64], counts: &[usize]) -> Result<Vec<u64>> {
        ensure!(
            words == self.peer_sets[self.local_rank].words(),
            "contribution does not match this rank's canned cpu set"
        );
        ensure!(counts.len() == self.peer_sets.len(), "bad counts length");
        Ok(self
            .peer_sets
            .iter()
            .flat_map(|set| set.words().iter().copied())
            .collect())
    }
}

/// Poll `pred` until it returns true or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    pred()
}
