use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{trace, warn};

/// A unit of deferred work queued on the loop.
pub type Task = Box<dyn FnOnce()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Scheduling port used by everything that needs to defer work.
///
/// Microtasks run at the next checkpoint, after the current synchronous work
/// and before any timer. Timers are fire-and-forget.
pub trait Scheduler {
    fn queue_microtask(&self, task: Task);
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId;
    fn now(&self) -> Instant;
}

const MAX_MICROTASKS: usize = 10_000;

/// Single-threaded page event loop with a microtask queue and a timer queue.
///
/// Time comes from `tokio::time`, so tests can drive the loop with a paused
/// clock.
#[derive(Default)]
pub struct EventLoop {
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Instant, TimerId), Task>>,
    next_timer_id: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued microtasks, including any queued while draining.
    pub fn perform_microtask_checkpoint(&self) -> usize {
        let mut executed = 0usize;
        loop {
            let task = self.microtasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            executed += 1;
            if executed >= MAX_MICROTASKS {
                warn!(
                    target: "event_loop",
                    "Stopped microtask checkpoint after {} tasks (possible loop)",
                    MAX_MICROTASKS
                );
                break;
            }
        }
        executed
    }

    /// Fire every timer whose deadline has passed, with a checkpoint after each.
    pub fn run_due_timers(&self) -> usize {
        let now = Instant::now();
        let mut fired = 0usize;
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                let next = timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= now);
                next.and_then(|key| timers.remove(&key))
            };
            let Some(task) = due else {
                break;
            };
            task();
            fired += 1;
            self.perform_microtask_checkpoint();
        }
        if fired > 0 {
            trace!(target: "event_loop", fired, "ran due timers");
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Drive the loop for `duration`, sleeping between timer deadlines.
    pub async fn advance(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            self.perform_microtask_checkpoint();
            self.run_due_timers();
            match self.next_deadline() {
                Some(next) if next <= deadline => sleep_until(next).await,
                _ => break,
            }
        }
        sleep_until(deadline).await;
        self.run_due_timers();
        self.perform_microtask_checkpoint();
    }
}

impl Scheduler for EventLoop {
    fn queue_microtask(&self, task: Task) {
        self.microtasks.borrow_mut().push_back(task);
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_timer_id.get());
        self.next_timer_id.set(id.0 + 1);
        self.timers
            .borrow_mut()
            .insert((Instant::now() + delay, id), task);
        id
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn microtasks_queued_during_checkpoint_run_in_same_checkpoint() {
        let event_loop = Rc::new(EventLoop::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_loop = Rc::clone(&event_loop);
        let inner_log = Rc::clone(&log);
        event_loop.queue_microtask(Box::new(move || {
            inner_log.borrow_mut().push("outer");
            let nested_log = Rc::clone(&inner_log);
            inner_loop.queue_microtask(Box::new(move || nested_log.borrow_mut().push("nested")));
        }));

        assert_eq!(event_loop.perform_microtask_checkpoint(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
        assert_eq!(event_loop.pending_microtasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_in_deadline_order() {
        let event_loop = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (delay, label) in [(30u64, "late"), (10, "early"), (20, "middle")] {
            let log = Rc::clone(&log);
            event_loop.set_timeout(
                Duration::from_millis(delay),
                Box::new(move || log.borrow_mut().push(label)),
            );
        }

        event_loop.advance(Duration::from_millis(15)).await;
        assert_eq!(*log.borrow(), vec!["early"]);

        event_loop.advance(Duration::from_millis(20)).await;
        assert_eq!(*log.borrow(), vec!["early", "middle", "late"]);
        assert_eq!(event_loop.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn microtask_checkpoint_runs_before_next_timer() {
        let event_loop = Rc::new(EventLoop::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let timer_log = Rc::clone(&log);
        event_loop.set_timeout(
            Duration::ZERO,
            Box::new(move || timer_log.borrow_mut().push("timer")),
        );
        let micro_log = Rc::clone(&log);
        event_loop.queue_microtask(Box::new(move || micro_log.borrow_mut().push("microtask")));

        event_loop.advance(Duration::ZERO).await;
        assert_eq!(*log.borrow(), vec!["microtask", "timer"]);
    }
}
