#![allow(dead_code)]

pub use parexec_test_utils::{
    ExitLog, FakeScript, Harness, ManualDriver, batch_of, config_with_limit, init_tracing,
};

use std::time::Duration;

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
