mod common;
use crate::common::{FakeScript, Harness, batch_of, config_with_limit, init_tracing, ms};

use std::time::Duration;

use parexec::engine::{CancelOutcome, CommandOutcome, ProcessState};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn cancelling_a_queued_command_skips_it() {
    init_tracing();
    let h = Harness::with_limit(1);

    h.scheduler.exec(batch_of(&["x", "y"])).unwrap();
    assert_eq!(
        h.scheduler.stop_command("y", STOP_TIMEOUT, None),
        CancelOutcome::Deferred
    );
    h.run();

    assert_eq!(h.adapter.started(), ["x"]);
    assert_eq!(h.exits.ids(), ["x"]);
    assert_eq!(
        h.scheduler.state_of("y"),
        Some(ProcessState::SkippedByCancellation)
    );
    assert!(
        h.scheduler
            .outcomes()
            .contains(&("y".to_string(), CommandOutcome::SkippedByCancellation))
    );
    assert!(h.adapter.stops().is_empty());
}

#[test]
fn cancelling_a_running_command_stops_it_once() {
    init_tracing();
    let h = Harness::with_limit(2);
    h.adapter.script("a", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    h.advance(ms(20));

    assert_eq!(
        h.scheduler.stop_command("a", STOP_TIMEOUT, None),
        CancelOutcome::Requested
    );
    assert_eq!(h.scheduler.state_of("a"), Some(ProcessState::StopRequested));
    assert_eq!(
        h.scheduler.stop_command("a", STOP_TIMEOUT, Some(9)),
        CancelOutcome::NoOp
    );
    h.run();

    assert_eq!(h.adapter.stop_count("a"), 1);
    assert_eq!(h.exits.code_of("a"), Some(Some(143)));
    assert_eq!(h.exits.code_of("b"), Some(Some(0)));
    assert_eq!(h.scheduler.state_of("a"), Some(ProcessState::Exited));
}

#[test]
fn cancelling_finished_or_unknown_commands_is_a_noop() {
    init_tracing();
    let h = Harness::with_limit(1);

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    h.run();

    assert_eq!(
        h.scheduler.stop_command("a", STOP_TIMEOUT, None),
        CancelOutcome::NoOp
    );
    assert_eq!(
        h.scheduler.stop_command("nope", STOP_TIMEOUT, None),
        CancelOutcome::NoOp
    );
    assert!(h.adapter.stops().is_empty());
}

#[test]
fn stop_all_stops_running_and_skips_pending() {
    init_tracing();
    let h = Harness::with_limit(2);
    for id in ["a", "b", "c"] {
        h.adapter.script(id, FakeScript::runs_for(ms(1_000)));
    }

    h.scheduler.exec(batch_of(&["a", "b", "c"])).unwrap();
    h.advance(ms(20));

    assert_eq!(
        h.scheduler.stop_all(STOP_TIMEOUT, None),
        CancelOutcome::Requested
    );
    assert_eq!(h.scheduler.stop_all(STOP_TIMEOUT, None), CancelOutcome::NoOp);
    assert_eq!(
        h.scheduler.stop_command("c", STOP_TIMEOUT, None),
        CancelOutcome::NoOp
    );
    h.run();

    assert_eq!(h.adapter.started(), ["a", "b"]);
    assert_eq!(h.adapter.stop_count("a"), 1);
    assert_eq!(h.adapter.stop_count("b"), 1);
    assert_eq!(h.adapter.stop_count("c"), 0);

    let mut calls = h.exits.calls();
    calls.sort();
    assert_eq!(
        calls,
        [("a".to_string(), Some(143)), ("b".to_string(), Some(143))]
    );
    assert_eq!(
        h.scheduler.state_of("c"),
        Some(ProcessState::SkippedByCancellation)
    );
    assert!(h.scheduler.is_idle());
}

#[test]
fn stop_all_passes_signal_and_timeout_through() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter.script("a", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    h.advance(ms(20));
    h.scheduler.stop_all(ms(250), Some(2));
    h.run();

    let stops = h.adapter.stops();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].timeout, ms(250));
    assert_eq!(stops[0].signal, Some(2));
    assert_eq!(h.exits.code_of("a"), Some(Some(130)));
}

#[test]
fn stubborn_process_is_reaped_after_the_stop_timeout() {
    init_tracing();
    let h = Harness::with_limit(1);
    h.adapter
        .script("stubborn", FakeScript::runs_for(ms(60_000)).ignores_stop());

    h.scheduler.exec(batch_of(&["stubborn"])).unwrap();
    h.advance(ms(20));
    h.scheduler.stop_all(ms(300), None);

    h.advance(ms(200));
    assert!(h.scheduler.is_any_running());

    h.run();
    assert_eq!(h.exits.code_of("stubborn"), Some(Some(137)));
    assert!(h.driver.now() < ms(1_000));
}

#[test]
fn stop_all_after_the_batch_finished_is_a_noop() {
    init_tracing();
    let h = Harness::with_limit(1);

    h.scheduler.exec(batch_of(&["a"])).unwrap();
    h.run();

    assert_eq!(h.scheduler.stop_all(STOP_TIMEOUT, None), CancelOutcome::NoOp);
    assert!(h.adapter.stops().is_empty());
}

#[test]
fn stop_all_from_before_start_stops_the_command_being_started() {
    init_tracing();
    let config = config_with_limit(1).on_before_start(|scheduler, _handle, _spec, id| {
        if id == "a" {
            scheduler.stop_all(Duration::from_secs(1), None);
        }
    });
    let h = Harness::new(config);
    h.adapter.script("a", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["a"]);
    assert_eq!(h.adapter.stop_count("a"), 1);
    assert_eq!(h.exits.code_of("a"), Some(Some(143)));
    assert_eq!(
        h.scheduler.state_of("b"),
        Some(ProcessState::SkippedByCancellation)
    );
}

#[test]
fn cancelling_a_command_while_it_starts_stops_it_right_after() {
    init_tracing();
    let config = config_with_limit(2).on_before_start(|scheduler, _handle, _spec, id| {
        if id == "a" {
            let outcome = scheduler.stop_command(id, Duration::from_secs(1), None);
            assert_eq!(outcome, CancelOutcome::Deferred);
        }
    });
    let h = Harness::new(config);
    h.adapter.script("a", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["a", "b"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["a", "b"]);
    assert_eq!(h.adapter.stop_count("a"), 1);
    assert_eq!(h.exits.code_of("a"), Some(Some(143)));
    assert_eq!(h.exits.code_of("b"), Some(Some(0)));
}

#[test]
fn stop_on_failure_hook_stops_the_rest_of_the_batch() {
    init_tracing();
    let config = config_with_limit(1)
        .on_exit(parexec::hooks::stop_all_on_failure(Duration::from_secs(1)));
    let h = Harness::new(config);
    h.adapter.script("fails", FakeScript::runs_for(ms(50)).exits_with(1));
    h.adapter.script("next", FakeScript::runs_for(ms(1_000)));
    h.adapter.script("last", FakeScript::runs_for(ms(1_000)));

    h.scheduler.exec(batch_of(&["fails", "next", "last"])).unwrap();
    h.run();

    assert_eq!(h.adapter.started(), ["fails", "next"]);
    assert_eq!(
        h.scheduler.state_of("last"),
        Some(ProcessState::SkippedByCancellation)
    );
    assert_eq!(h.exits.code_of("fails"), Some(Some(1)));
    assert_eq!(h.exits.code_of("next"), Some(Some(143)));
}
