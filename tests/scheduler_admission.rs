mod common;
use crate::common::{FakeScript, Harness, batch_of, config_with_limit, init_tracing, ms};

use std::sync::{Arc, Mutex};

use parexec::engine::{CommandOutcome, ProcessState};

#[test]
fn commands_start_in_batch_order_within_the_limit() {
    init_tracing();
    let h = Harness::with_limit(2);

    h.scheduler.exec(batch_of(&["a", "b", "c", "d", "e"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["a", "b", "c", "d", "e"]);
    assert_eq!(h.adapter.peak_concurrency(), 2);
    assert!(h.scheduler.is_idle());
    assert_eq!(h.scheduler.count_running(), 0);
}

#[test]
fn limit_of_one_runs_strictly_sequentially() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter.script("slow", FakeScript::runs_for(ms(500)));
    h.adapter.script("fast", FakeScript::runs_for(ms(5)));

    h.scheduler.exec(batch_of(&["slow", "fast"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["slow", "fast"]);
    assert_eq!(h.adapter.peak_concurrency(), 1);
    assert_eq!(h.exits.ids(), ["slow", "fast"]);
}

#[test]
fn zero_limit_is_treated_as_one() {
    init_tracing();
    let h = Harness::with_limit(0);

    h.scheduler.exec(batch_of(&["a", "b", "c"])).unwrap();
    h.run();

    assert_eq!(h.scheduler.config().concurrency_limit, 1);
    assert_eq!(h.adapter.peak_concurrency(), 1);
    assert_eq!(h.exits.ids().len(), 3);
}

#[test]
fn a_freed_slot_is_refilled_while_others_keep_running() {
    init_tracing();
    let h = Harness::with_limit(2);
    h.adapter.script("long", FakeScript::runs_for(ms(1_000)));
    h.adapter.script("short", FakeScript::runs_for(ms(20)));
    h.adapter.script("next", FakeScript::runs_for(ms(20)));

    h.scheduler.exec(batch_of(&["long", "short", "next"])).unwrap();

    h.advance(ms(20));
    assert_eq!(h.adapter.started(), ["long", "short"]);
    assert_eq!(h.scheduler.state_of("next"), Some(ProcessState::Queued));

    h.advance(ms(200));
    assert_eq!(h.adapter.started(), ["long", "short", "next"]);
    assert_eq!(h.scheduler.state_of("long"), Some(ProcessState::Running));
    assert_eq!(h.scheduler.state_of("short"), Some(ProcessState::Exited));

    h.run();
    assert_eq!(h.adapter.peak_concurrency(), 2);
}

#[test]
fn before_start_never_sees_more_than_the_limit() {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_hook = Arc::clone(&seen);
    let config = config_with_limit(3).on_before_start(move |scheduler, _handle, _spec, _id| {
        seen_in_hook.lock().unwrap().push(scheduler.count_running());
    });
    let h = Harness::new(config);

    let ids: Vec<String> = (0..10).map(|i| format!("job-{i}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    h.scheduler.exec(batch_of(&refs)).unwrap();
    h.run();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 10);
    assert!(seen.iter().all(|running| *running <= 3), "counts: {seen:?}");
    assert_eq!(h.adapter.peak_concurrency(), 3);
}

#[test]
fn every_started_command_gets_exactly_one_exit_callback() {
    init_tracing();
    let h = Harness::with_limit(4);
    h.adapter.script("ok", FakeScript::runs_for(ms(30)));
    h.adapter.script("bad", FakeScript::runs_for(ms(10)).exits_with(3));
    h.adapter.script("mystery", FakeScript::runs_for(ms(10)).unknown_exit_code());

    h.scheduler.exec(batch_of(&["ok", "bad", "mystery"])).unwrap();
    h.run();

    let mut calls = h.exits.calls();
    calls.sort();
    assert_eq!(
        calls,
        [
            ("bad".to_string(), Some(3)),
            ("mystery".to_string(), None),
            ("ok".to_string(), Some(0)),
        ]
    );

    let outcomes = h.scheduler.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.contains(&("bad".to_string(), CommandOutcome::Exited(Some(3)))));
}

#[test]
fn status_errors_are_reported_as_unknown_exit_codes() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter.script("flaky", FakeScript::runs_for(ms(10)).with_status_error());

    h.scheduler.exec(batch_of(&["flaky"])).unwrap();
    h.run();

    assert_eq!(h.exits.code_of("flaky"), Some(None));
    assert_eq!(
        h.scheduler.outcomes(),
        [("flaky".to_string(), CommandOutcome::Exited(None))]
    );
}

#[test]
fn empty_batch_goes_idle_without_starting_anything() {
    init_tracing();
    let h = Harness::with_limit(2);

    h.scheduler.exec(batch_of(&[])).unwrap();
    assert!(!h.scheduler.is_idle());
    h.run();

    assert!(h.scheduler.is_idle());
    assert!(h.adapter.started().is_empty());
    assert!(h.exits.calls().is_empty());
}
