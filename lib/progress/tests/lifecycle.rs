// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Startup, shutdown, and binding behavior of a live engine.

use std::sync::Arc;
use std::time::Duration;

use pulse_progress::testing::{wait_until, EventLog, ScriptedOp, StaticTopology};
use pulse_progress::topology::CpuSet;
use pulse_progress::{
    ComputeStream, EngineConfig, EngineError, ProgressEngine, StepAction::*,
};

const WAIT: Duration = Duration::from_secs(5);

fn bindable_platform() -> Arc<StaticTopology> {
    let cores = (0..4).map(|cpu| CpuSet::from_cpus([cpu])).collect();
    Arc::new(StaticTopology::new(CpuSet::from_cpus(0..4), cores))
}

fn engine_on(platform: Arc<StaticTopology>, config: EngineConfig) -> ProgressEngine {
    pulse_progress::logging::init();
    ProgressEngine::builder()
        .config(config)
        .platform(platform)
        .build()
        .unwrap()
}

/// Clean start/stop with no work; a second stop is a lifecycle error.
#[test]
fn stop_is_single_shot() {
    let engine = engine_on(bindable_platform(), EngineConfig::default());
    engine.run().unwrap();
    engine.stop().unwrap();
    assert_eq!(engine.stop().unwrap_err(), EngineError::StopTwice);
}

/// `run` is idempotent: one worker, one bind, no matter how often or
/// from how many threads it is called.
#[test]
fn run_twice_starts_once() {
    let platform = bindable_platform();
    let engine = engine_on(platform.clone(), EngineConfig::default());
    engine.run().unwrap();
    engine.run().unwrap();
    assert_eq!(platform.bind_count(), 1);
    engine.stop().unwrap();
}

#[test]
fn concurrent_run_callers_start_once() {
    let platform = bindable_platform();
    let engine = Arc::new(engine_on(platform.clone(), EngineConfig::default()));
    let racers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.run())
        })
        .collect();
    for racer in racers {
        racer.join().unwrap().unwrap();
    }
    assert_eq!(platform.bind_count(), 1);
    engine.stop().unwrap();
}

/// The worker binds to the core picked at construction, singlified to
/// one hardware thread.
#[test]
fn worker_binds_to_its_planned_core() {
    let cores = vec![CpuSet::from_cpus([0, 8]), CpuSet::from_cpus([1, 9])];
    let platform = Arc::new(StaticTopology::new(CpuSet::from_cpus([0, 1, 8, 9]), cores));
    let engine = engine_on(platform.clone(), EngineConfig::default());
    engine.run().unwrap();
    engine.stop().unwrap();
    // Solo rank takes the last core, reduced to its lowest thread.
    assert_eq!(platform.last_bound(), Some(CpuSet::from_cpus([1])));
}

/// An empty CPU set from the topology layer disables binding and
/// nothing else.
#[test]
fn empty_cpuset_leaves_worker_unbound() {
    let platform = Arc::new(StaticTopology::empty());
    let engine = engine_on(
        platform.clone(),
        EngineConfig {
            add_default_stream: false,
            ..Default::default()
        },
    );
    engine.run().unwrap();

    let log = EventLog::new();
    engine
        .enqueue(ScriptedOp::unbounded(
            "op",
            ComputeStream::from_raw(1),
            vec![Cont, Complete],
            &log,
        ))
        .unwrap();
    assert!(wait_until(WAIT, || !log.completed().is_empty()));

    engine.stop().unwrap();
    assert_eq!(platform.bind_count(), 0);
}

/// With start-on-demand, the first enqueue performs exactly one run
/// transition, even under concurrent submitters.
#[test]
fn start_on_demand_runs_once_under_contention() {
    let platform = bindable_platform();
    let engine = Arc::new(engine_on(
        platform.clone(),
        EngineConfig {
            start_on_demand: true,
            add_default_stream: false,
            ..Default::default()
        },
    ));
    let log = EventLog::new();

    let submitters: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..8 {
                    let label = format!("t{t}-{i}");
                    engine
                        .enqueue(ScriptedOp::unbounded(
                            &label,
                            ComputeStream::from_raw(0x100 + t),
                            vec![Cont, Complete],
                            &log,
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    assert!(wait_until(WAIT, || log.completed().len() == 32));
    assert_eq!(platform.bind_count(), 1);
    engine.stop().unwrap();
}

/// Submissions before `run` queue up and execute once the engine
/// starts, in order.
#[test]
fn queued_work_runs_after_late_start() {
    let engine = engine_on(
        bindable_platform(),
        EngineConfig {
            add_default_stream: false,
            ..Default::default()
        },
    );
    let log = EventLog::new();
    for i in 0..4 {
        engine
            .enqueue(ScriptedOp::unbounded(
                &format!("op{i}"),
                ComputeStream::from_raw(0x50),
                vec![Complete],
                &log,
            ))
            .unwrap();
    }
    engine.run().unwrap();

    assert!(wait_until(WAIT, || log.completed().len() == 4));
    engine.stop().unwrap();
    assert_eq!(log.started(), ["op0", "op1", "op2", "op3"]);
    assert_eq!(log.completed(), ["op0", "op1", "op2", "op3"]);
}

/// `dump_state` is safe to call while the worker runs and shows an
/// in-flight operation once the scheduler is quiescent.
#[test]
fn dump_state_reports_in_flight_work() {
    let engine = engine_on(
        bindable_platform(),
        EngineConfig {
            add_default_stream: false,
            ..Default::default()
        },
    );
    let log = EventLog::new();
    engine
        .enqueue(ScriptedOp::unbounded(
            "long-runner",
            ComputeStream::from_raw(2),
            ScriptedOp::cont_then_complete(1_000_000),
            &log,
        ))
        .unwrap();
    engine.run().unwrap();
    assert!(wait_until(WAIT, || !log.started().is_empty()));

    // Best effort while the worker is live: either a dump or the busy
    // notice, never a crash.
    let mut live = String::new();
    engine.dump_state(&mut live).unwrap();
    assert!(!live.is_empty());

    engine.stop().unwrap();
    let mut settled = String::new();
    engine.dump_state(&mut settled).unwrap();
    assert!(settled.contains("long-runner"));
}
