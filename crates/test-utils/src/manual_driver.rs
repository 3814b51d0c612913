use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parexec::driver::{Callback, Driver};

/// A driver with a virtual clock.
///
/// Nothing runs until the test asks for it: `run_next` jumps the clock to the
/// earliest due callback and runs it, `advance` runs everything due within a
/// window. Callbacks due at the same instant run in scheduling order.
pub struct ManualDriver {
    inner: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    queue: BinaryHeap<Entry>,
}

struct Entry {
    due: Duration,
    seq: u64,
    callback: Callback,
}

// Reversed so the max-heap pops the earliest (due, seq) first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl ManualDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ManualState::default()),
        })
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.inner.lock().unwrap().now
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Run the earliest callback, moving the clock to its due time.
    /// Returns `false` when nothing is scheduled.
    pub fn run_next(&self) -> bool {
        let entry = {
            let mut state = self.inner.lock().unwrap();
            let Some(entry) = state.queue.pop() else {
                return false;
            };
            state.now = state.now.max(entry.due);
            entry
        };
        // The lock is released so the callback can schedule more work.
        (entry.callback)();
        true
    }

    /// Run every callback due within `by`, then set the clock to `now + by`.
    pub fn advance(&self, by: Duration) {
        let deadline = self.now() + by;
        loop {
            let due_soon = {
                let state = self.inner.lock().unwrap();
                state.queue.peek().is_some_and(|e| e.due <= deadline)
            };
            if !due_soon {
                break;
            }
            self.run_next();
        }
        let mut state = self.inner.lock().unwrap();
        state.now = state.now.max(deadline);
    }

    /// Run callbacks until none are left.
    ///
    /// Panics after `max_steps` callbacks, which catches loops that never
    /// settle.
    pub fn run_until_idle(&self, max_steps: usize) -> usize {
        let mut steps = 0;
        while self.run_next() {
            steps += 1;
            assert!(
                steps <= max_steps,
                "driver did not settle after {max_steps} callbacks (now = {:?})",
                self.now()
            );
        }
        steps
    }
}

impl Driver for ManualDriver {
    fn schedule_after(&self, delay: Duration, callback: Callback) {
        let mut state = self.inner.lock().unwrap();
        let due = state.now + delay;
        let seq = state.seq;
        state.seq += 1;
        state.queue.push(Entry { due, seq, callback });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_in_due_then_fifo_order() {
        let driver = ManualDriver::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (delay, name) in [(30, "late"), (10, "first"), (10, "second"), (0, "now")] {
            let log = Arc::clone(&log);
            driver.schedule_after(
                Duration::from_millis(delay),
                Box::new(move || log.lock().unwrap().push(name)),
            );
        }

        assert_eq!(driver.run_until_idle(10), 4);
        assert_eq!(*log.lock().unwrap(), ["now", "first", "second", "late"]);
        assert_eq!(driver.now(), Duration::from_millis(30));
    }

    #[test]
    fn callbacks_can_schedule_more_work() {
        let driver = ManualDriver::new();
        let hits = Arc::new(Mutex::new(0));

        let inner_driver = Arc::clone(&driver);
        let inner_hits = Arc::clone(&hits);
        driver.schedule_after(
            Duration::from_millis(5),
            Box::new(move || {
                *inner_hits.lock().unwrap() += 1;
                let hits = Arc::clone(&inner_hits);
                inner_driver.schedule_after(
                    Duration::from_millis(5),
                    Box::new(move || *hits.lock().unwrap() += 1),
                );
            }),
        );

        driver.advance(Duration::from_millis(7));
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(driver.pending(), 1);

        driver.advance(Duration::from_millis(3));
        assert_eq!(*hits.lock().unwrap(), 2);
        assert_eq!(driver.now(), Duration::from_millis(10));
    }
}
