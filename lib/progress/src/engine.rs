// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The progress engine: lifecycle, submission, and the worker loop.
//!
//! One dedicated OS thread (the worker) owns the pipeline scheduler and
//! is the sole consumer of every input queue; submitters are arbitrary
//! caller threads. The lifecycle is
//! `uninitialized -> starting -> running -> stopping -> stopped`:
//! [`ProgressEngine::run`] is idempotent and concurrent callers wait for
//! the single start transition; [`ProgressEngine::stop`] is single-shot.
//!
//! On startup the worker makes the engine's captured GPU device current,
//! applies the bind plan, and only then reports itself running. On stop
//! it finishes the current iteration and exits without draining;
//! quiescing submissions before `stop` is the caller's contract.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::comm::{PeerComm, SoloComm};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gpu::{self, DeviceRuntime};
use crate::pipeline::Scheduler;
use crate::registry::StreamRegistry;
use crate::state::OpState;
use crate::topology::binder::BindPlan;
use crate::topology::{self, Platform};
use crate::trace::{TraceRecord, TraceSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct Shared {
    registry: StreamRegistry,
    /// Owned by the worker in the steady state; locked once per
    /// iteration. `dump_state` try-locks it for best-effort reads.
    scheduler: Mutex<Scheduler>,
    config: EngineConfig,
    phase: Mutex<Phase>,
    phase_cv: Condvar,
    started: AtomicBool,
    stop: AtomicBool,
    faulted: AtomicBool,
    fault: Mutex<Option<EngineError>>,
    plan: BindPlan,
    platform: Arc<dyn Platform>,
    comm: Arc<dyn PeerComm>,
    gpu: Arc<dyn DeviceRuntime>,
    device: Option<i32>,
    trace: Option<Arc<TraceSink>>,
}

/// Drives asynchronous collective operations to completion on a
/// dedicated, topology-bound worker thread.
///
/// Operations are submitted with [`enqueue`](Self::enqueue) and stepped
/// through a fixed-depth pipeline per compute stream; operations on one
/// stream start in enqueue order and complete in start order.
pub struct ProgressEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ProgressEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressEngine").finish_non_exhaustive()
    }
}

/// Builder for [`ProgressEngine`], wiring in the collaborator seams.
///
/// Defaults: configuration from the environment, the host topology
/// platform, the single-process communicator, and the device runtime
/// selected by this build's features.
#[derive(Default)]
pub struct ProgressEngineBuilder {
    config: Option<EngineConfig>,
    platform: Option<Arc<dyn Platform>>,
    comm: Option<Arc<dyn PeerComm>>,
    gpu: Option<Arc<dyn DeviceRuntime>>,
}

impl ProgressEngineBuilder {
    /// Use an explicit configuration instead of the environment.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific topology platform.
    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Use a specific peer communicator.
    pub fn comm(mut self, comm: Arc<dyn PeerComm>) -> Self {
        self.comm = Some(comm);
        self
    }

    /// Use a specific GPU device runtime.
    pub fn gpu(mut self, gpu: Arc<dyn DeviceRuntime>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    /// Validate the configuration, capture the current GPU device, and
    /// compute the bind plan for this rank.
    ///
    /// Fatal here: invalid configuration, a topology interface version
    /// mismatch, and peer-exchange failures. Topology problems merely
    /// disable binding.
    pub fn build(self) -> Result<ProgressEngine, EngineError> {
        let config = self.config.unwrap_or_else(EngineConfig::from_env);
        config.validate()?;
        let platform = self.platform.unwrap_or_else(topology::host_platform);
        let comm = self.comm.unwrap_or_else(|| Arc::new(SoloComm));
        let gpu = self.gpu.unwrap_or_else(gpu::host_runtime);

        let device = match gpu.current_device() {
            Ok(device) => device,
            Err(err) => {
                tracing::warn!(
                    rank = comm.rank(),
                    err = format!("{err:#}"),
                    "could not capture current device for progress worker"
                );
                None
            }
        };
        let plan = BindPlan::compute(platform.as_ref(), comm.as_ref(), device)?;

        let trace = if config.trace {
            Some(Arc::new(TraceSink::new()))
        } else {
            None
        };
        let scheduler = Scheduler::new(
            config.pipeline_depth,
            config.concurrency_cap,
            config.hang_check,
            comm.rank(),
            trace.clone(),
        );
        let registry = StreamRegistry::new(&config);

        Ok(ProgressEngine {
            shared: Arc::new(Shared {
                registry,
                scheduler: Mutex::new(scheduler),
                config,
                phase: Mutex::new(Phase::Uninitialized),
                phase_cv: Condvar::new(),
                started: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
                fault: Mutex::new(None),
                plan,
                platform,
                comm,
                gpu,
                device,
                trace,
            }),
            worker: Mutex::new(None),
        })
    }
}

impl ProgressEngine {
    /// Builder with default collaborators.
    pub fn builder() -> ProgressEngineBuilder {
        ProgressEngineBuilder::default()
    }

    /// Engine with configuration from the environment and the host's
    /// default collaborators.
    pub fn new() -> Result<Self, EngineError> {
        Self::builder().build()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Submit an operation; the engine owns the state until it
    /// completes.
    ///
    /// Finds or lazily creates the input queue for the state's compute
    /// stream and pushes. The steady-state path is lock-free; only the
    /// first submission on a new stream takes a mutex. With
    /// `start_on_demand`, the first submission also starts the engine.
    pub fn enqueue(&self, state: Box<dyn OpState>) -> Result<(), EngineError> {
        if self.shared.config.start_on_demand && !self.shared.started.load(Ordering::Acquire) {
            self.run()?;
        }
        let queue = self.shared.registry.queue_for(state.compute_stream())?;
        queue.push(state);
        Ok(())
    }

    /// Start the worker thread. Idempotent: returns once the engine is
    /// running, whether this call started it or a concurrent one did.
    pub fn run(&self) -> Result<(), EngineError> {
        let mut phase = self.shared.phase.lock();
        loop {
            match *phase {
                Phase::Running => return Ok(()),
                Phase::Starting => self.shared.phase_cv.wait(&mut phase),
                Phase::Stopping | Phase::Stopped => return Err(EngineError::RunAfterStop),
                Phase::Uninitialized => break,
            }
        }
        *phase = Phase::Starting;

        let shared = Arc::clone(&self.shared);
        let handle = match std::thread::Builder::new()
            .name("pulse-progress".to_string())
            .spawn(move || worker_main(shared))
        {
            Ok(handle) => handle,
            Err(err) => {
                *phase = Phase::Uninitialized;
                return Err(EngineError::WorkerSpawn(err.to_string()));
            }
        };
        *self.worker.lock() = Some(handle);

        while *phase != Phase::Running {
            self.shared.phase_cv.wait(&mut phase);
        }
        Ok(())
    }

    /// Stop the worker thread.
    ///
    /// The worker finishes its current iteration and exits; outstanding
    /// work is neither drained nor cancelled, so callers must quiesce
    /// submissions first. Returns the worker's fault if it halted on a
    /// fatal error. Calling `stop` on a never-started engine is a no-op;
    /// calling it twice is a lifecycle error.
    pub fn stop(&self) -> Result<(), EngineError> {
        if !self.shared.started.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.shared.stop.swap(true, Ordering::AcqRel) {
            return Err(EngineError::StopTwice);
        }
        *self.shared.phase.lock() = Phase::Stopping;

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(rank = self.shared.comm.rank(), "progress worker panicked");
            }
        }
        *self.shared.phase.lock() = Phase::Stopped;

        match self.shared.fault.lock().take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// The fatal error that halted the worker, if any.
    pub fn fault(&self) -> Option<EngineError> {
        if self.shared.faulted.load(Ordering::Acquire) {
            self.shared.fault.lock().clone()
        } else {
            None
        }
    }

    /// Best-effort diagnostic dump of every pipeline row.
    ///
    /// Racing the worker is expected here: if the scheduler is busy the
    /// dump reports that instead of blocking, and a successful dump may
    /// be stale by the time it is read.
    pub fn dump_state<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        match self.shared.scheduler.try_lock() {
            Some(scheduler) => scheduler.dump(out),
            None => writeln!(out, "progress engine busy; no state dump available"),
        }
    }

    /// Take the trace records accumulated so far. Empty unless the
    /// `trace` knob is on.
    pub fn drain_trace(&self) -> Vec<TraceRecord> {
        self.shared
            .trace
            .as_ref()
            .map(|sink| sink.drain())
            .unwrap_or_default()
    }
}

impl Drop for ProgressEngine {
    /// Last-resort cleanup: join the worker if the engine is still
    /// running. Faults are lost here; `stop()` is the API that surfaces
    /// them.
    fn drop(&mut self) {
        if self.shared.started.load(Ordering::Acquire)
            && !self.shared.stop.swap(true, Ordering::AcqRel)
        {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_main(shared: Arc<Shared>) {
    let rank = shared.comm.rank();
    if let Some(device) = shared.device {
        if let Err(err) = shared.gpu.set_device(device) {
            tracing::warn!(
                rank,
                device,
                err = format!("{err:#}"),
                "could not set device on progress worker"
            );
        }
    }
    shared.plan.apply(shared.platform.as_ref(), shared.device, rank);

    {
        let mut phase = shared.phase.lock();
        *phase = Phase::Running;
        shared.started.store(true, Ordering::Release);
    }
    shared.phase_cv.notify_all();

    if let Err(fault) = drive(&shared) {
        tracing::error!(rank, err = %fault, "progress worker halted on fatal error");
        *shared.fault.lock() = Some(fault);
        shared.faulted.store(true, Ordering::Release);
    }
}

/// The hot loop: admission over every input queue, then one scheduler
/// pass, until the stop flag is observed.
fn drive(shared: &Shared) -> Result<(), EngineError> {
    while !shared.stop.load(Ordering::Acquire) {
        let mut scheduler = shared.scheduler.lock();

        let mut admitted_any = false;
        let published = shared.registry.len();
        for i in 0..published {
            let queue = shared.registry.queue(i);
            if let Some(state) = queue.pop_if(|head| scheduler.admits(head)) {
                scheduler.launch(state);
                admitted_any = true;
            }
        }

        scheduler.step_all()?;

        let idle = !admitted_any && scheduler.is_idle();
        drop(scheduler);
        if idle {
            std::thread::yield_now();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ComputeStream;
    use crate::testing::{EventLog, ScriptedOp, StaticTopology};
    use crate::topology::CpuSet;

    fn quiet_config() -> EngineConfig {
        EngineConfig {
            add_default_stream: false,
            ..Default::default()
        }
    }

    fn unbindable() -> Arc<StaticTopology> {
        Arc::new(StaticTopology::empty())
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = ProgressEngine::builder()
            .config(EngineConfig {
                concurrency_cap: 0,
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_topology_version_mismatch() {
        let platform = Arc::new(StaticTopology::empty().with_api_version(99));
        let err = ProgressEngine::builder()
            .config(quiet_config())
            .platform(platform)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::TopologyVersionMismatch { .. }));
    }

    #[test]
    fn stop_before_run_is_a_no_op() {
        let engine = ProgressEngine::builder()
            .config(quiet_config())
            .platform(unbindable())
            .build()
            .unwrap();
        engine.stop().unwrap();
        engine.stop().unwrap();
    }

    #[test]
    fn enqueue_before_run_just_queues() {
        let engine = ProgressEngine::builder()
            .config(quiet_config())
            .platform(unbindable())
            .build()
            .unwrap();
        let log = EventLog::new();
        engine
            .enqueue(ScriptedOp::unbounded(
                "queued",
                ComputeStream::from_raw(1),
                vec![crate::state::StepAction::Complete],
                &log,
            ))
            .unwrap();
        // Never started: nothing ran.
        assert!(log.events().is_empty());
    }

    #[test]
    fn dump_of_idle_engine_is_empty() {
        let engine = ProgressEngine::builder()
            .config(quiet_config())
            .platform(unbindable())
            .build()
            .unwrap();
        let mut out = String::new();
        engine.dump_state(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn default_stream_slot_is_prepopulated() {
        let engine = ProgressEngine::builder()
            .config(EngineConfig::default())
            .platform(unbindable())
            .build()
            .unwrap();
        assert_eq!(engine.shared.registry.len(), 1);
        assert_eq!(
            engine.shared.registry.queue(0).stream(),
            ComputeStream::DEFAULT
        );
    }

    #[test]
    fn bind_plan_uses_gpu_locality_when_device_present() {
        struct OneDevice;
        impl DeviceRuntime for OneDevice {
            fn current_device(&self) -> anyhow::Result<Option<i32>> {
                Ok(Some(0))
            }
            fn set_device(&self, _device: i32) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let cores = (0..2).map(|cpu| CpuSet::from_cpus([cpu])).collect();
        let platform = Arc::new(StaticTopology::new(CpuSet::from_cpus(0..2), cores));
        let engine = ProgressEngine::builder()
            .config(quiet_config())
            .platform(platform)
            .gpu(Arc::new(OneDevice))
            .build()
            .unwrap();
        assert_eq!(engine.shared.device, Some(0));
        assert_eq!(engine.shared.plan.core(), Some(1));
    }
}
