mod common;
use crate::common::{FakeScript, Harness, batch_of, config_with_limit, init_tracing, ms};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parexec::command::{Batch, CommandSpec};
use parexec::engine::{CancelOutcome, CommandOutcome, ProcessState};
use parexec::errors::ParexecError;
use parexec::exec::SpawnRequest;
use parexec::types::StreamKind;

#[test]
fn exec_is_rejected_while_a_batch_is_in_flight() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter.script("a", FakeScript::runs_for(ms(500)));

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    match h.scheduler.exec(batch_of(&["b"])) {
        Err(ParexecError::AlreadyRunning { running: 0, pending: 1 }) => {}
        other => panic!("expected AlreadyRunning before the first tick, got {other:?}"),
    }

    h.advance(ms(20));
    match h.scheduler.exec(batch_of(&["b"])) {
        Err(ParexecError::AlreadyRunning { running: 1, pending: 0 }) => {}
        other => panic!("expected AlreadyRunning while a runs, got {other:?}"),
    }

    h.run();
    assert_eq!(h.adapter.started(), ["a"]);
    assert_eq!(h.exits.ids(), ["a"]);
}

#[test]
fn a_new_batch_starts_clean_after_a_stopped_one() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter.script("a", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    h.advance(ms(20));
    h.scheduler.stop_all(Duration::from_secs(1), None);
    h.run();
    assert_eq!(h.adapter.started(), ["a"]);

    h.scheduler.exec(batch_of(&["b", "c"])).unwrap();
    assert_eq!(h.scheduler.state_of("a"), None);
    assert_eq!(h.scheduler.state_of("b"), Some(ProcessState::Queued));
    h.run();

    assert_eq!(h.adapter.started(), ["a", "b", "c"]);
    assert_eq!(h.exits.code_of("b"), Some(Some(0)));
    assert_eq!(h.exits.code_of("c"), Some(Some(0)));
    assert!(h.scheduler.is_idle());
}

#[test]
fn cancellations_do_not_leak_into_the_next_batch() {
    init_tracing();
    let h = Harness::with_limit(1);

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    assert_eq!(
        h.scheduler.stop_command("b", Duration::from_secs(1), None),
        CancelOutcome::NoOp
    );
    h.run();

    h.scheduler.exec(batch_of(&["b"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["a", "b"]);
    assert_eq!(h.scheduler.outcomes(), [("b".to_string(), CommandOutcome::Exited(Some(0)))]);
}

#[test]
fn a_command_that_fails_to_start_does_not_stop_the_batch() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter
        .script("broken", FakeScript::default().fails_on_create("no such program"));
    h.adapter
        .script("unlucky", FakeScript::default().fails_on_start("fork failed"));

    let batch = batch_of(&["broken", "unlucky", "fine"]).with("empty", CommandSpec::from_string(""));
    h.scheduler.exec(batch).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["fine"]);
    assert_eq!(h.exits.ids(), ["fine"]);
    assert_eq!(h.scheduler.state_of("broken"), Some(ProcessState::StartFailed));
    assert_eq!(h.scheduler.state_of("unlucky"), Some(ProcessState::StartFailed));
    assert_eq!(h.scheduler.state_of("empty"), Some(ProcessState::StartFailed));

    let outcomes = h.scheduler.outcomes();
    let broken = outcomes.iter().find(|(id, _)| id == "broken").map(|(_, o)| o.clone());
    match broken {
        Some(CommandOutcome::StartFailed(reason)) => assert!(reason.contains("no such program")),
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(h.scheduler.is_idle());
}

#[test]
fn before_start_hook_can_configure_the_request() {
    init_tracing();
    let config = config_with_limit(2).on_before_start(|_scheduler, handle, spec, id| {
        assert!(!handle.is_running());
        assert_eq!(spec.command_string(), id);
        handle
            .configure(&mut |req: &mut SpawnRequest| {
                req.env
                    .get_or_insert_with(Default::default)
                    .insert("JOB_ID".into(), id.to_string());
            })
            .unwrap();
    });
    let h = Harness::new(config);

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    h.run();

    let envs: Vec<Option<String>> = h
        .adapter
        .started_requests()
        .into_iter()
        .map(|req| req.env.and_then(|env| env.get("JOB_ID").cloned()))
        .collect();
    assert_eq!(envs, [Some("a".to_string()), Some("b".to_string())]);
}

#[test]
fn stream_hook_receives_output_with_the_command_id() {
    init_tracing();
    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&chunks);
    let config = config_with_limit(2).on_stream_read(move |kind, bytes, _s, _handle, _spec, id| {
        sink.lock()
            .unwrap()
            .push((id.to_string(), kind, String::from_utf8_lossy(bytes).into_owned()));
    });
    let h = Harness::new(config);
    h.adapter.script(
        "talker",
        FakeScript::default()
            .prints(StreamKind::Stdout, "hello\n")
            .prints(StreamKind::Stderr, "careful\n"),
    );

    h.scheduler.exec(batch_of(&["talker", "quiet"])).unwrap();
    h.run();

    assert_eq!(
        *chunks.lock().unwrap(),
        [
            ("talker".to_string(), StreamKind::Stdout, "hello\n".to_string()),
            ("talker".to_string(), StreamKind::Stderr, "careful\n".to_string()),
        ]
    );
}

#[test]
fn default_process_timeout_applies_unless_the_spec_sets_one() {
    init_tracing();
    let h = Harness::new(config_with_limit(2).with_process_timeout(Some(ms(100))));
    h.adapter.script("sleepy", FakeScript::runs_for(ms(10_000)));
    h.adapter.script("patient", FakeScript::runs_for(ms(300)));

    let batch = Batch::new()
        .with("sleepy", CommandSpec::from_string("sleepy"))
        .with(
            "patient",
            CommandSpec::from_string("patient").with_timeout(Some(Duration::ZERO)),
        );
    h.scheduler.exec(batch).unwrap();
    h.run();

    assert_eq!(h.exits.code_of("sleepy"), Some(Some(137)));
    assert_eq!(h.exits.code_of("patient"), Some(Some(0)));
}

#[test]
fn idle_flag_tracks_the_batch() {
    init_tracing();
    let h = Harness::with_limit(1);
    assert!(h.scheduler.is_idle());

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    assert!(!h.scheduler.is_idle());

    h.advance(ms(100));
    assert!(!h.scheduler.is_idle());
    assert!(h.scheduler.is_any_running());

    h.run();
    assert!(h.scheduler.is_idle());
    assert!(!h.scheduler.is_any_running());
}

#[test]
fn exit_hook_runs_outside_the_state_lock() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let config = config_with_limit(1).on_exit(move |_handle, _code, scheduler, _spec, id| {
        record
            .lock()
            .unwrap()
            .push((id.to_string(), scheduler.count_running(), scheduler.state_of(id)));
    });
    let h = Harness::new(config);

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    h.run();

    assert_eq!(
        *seen.lock().unwrap(),
        [("a".to_string(), 0, Some(ProcessState::Exited))]
    );
    assert!(h.scheduler.is_idle());
}
