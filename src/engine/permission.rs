use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::WindowMode;
use crate::dom::{InputKind, InputSource};
use crate::host::Scheduler;

/// Tracks whether a user gesture happened recently enough to excuse a
/// playback start.
pub struct PermissionWindow {
    this: Weak<PermissionWindow>,
    duration: Duration,
    mode: WindowMode,
    scheduler: Rc<dyn Scheduler>,
    active: Cell<bool>,
    deadline: Cell<Option<Instant>>,
    generation: Cell<u64>,
}

impl PermissionWindow {
    pub fn new(duration: Duration, mode: WindowMode, scheduler: Rc<dyn Scheduler>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            duration,
            mode,
            scheduler,
            active: Cell::new(false),
            deadline: Cell::new(None),
            generation: Cell::new(0),
        })
    }

    /// Record gestures for every listed input kind.
    pub fn listen(&self, source: &dyn InputSource, kinds: &[InputKind]) {
        for kind in kinds {
            let window = self.this.clone();
            source.add_input_listener(
                *kind,
                Rc::new(move || {
                    if let Some(window) = window.upgrade() {
                        window.record_gesture();
                    }
                }),
            );
        }
    }

    pub fn record_gesture(&self) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.active.set(true);
        self.deadline.set(Some(self.scheduler.now() + self.duration));

        let window = self.this.clone();
        self.scheduler.set_timeout(
            self.duration,
            Box::new(move || {
                if let Some(window) = window.upgrade() {
                    window.expire(generation);
                }
            }),
        );
    }

    fn expire(&self, generation: u64) {
        if self.mode == WindowMode::Rolling && generation != self.generation.get() {
            return;
        }
        trace!(target: "engine", generation, "gesture window closed");
        self.active.set(false);
        self.deadline.set(None);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EventLoop;

    fn window(mode: WindowMode) -> (Rc<EventLoop>, Rc<PermissionWindow>) {
        let event_loop = Rc::new(EventLoop::new());
        let window = PermissionWindow::new(Duration::from_millis(5_000), mode, event_loop.clone());
        (event_loop, window)
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_configured_duration() {
        let (event_loop, window) = window(WindowMode::Rolling);
        assert!(!window.is_active());

        window.record_gesture();
        assert!(window.is_active());
        assert!(window.deadline().is_some());

        event_loop.advance(Duration::from_millis(4_999)).await;
        assert!(window.is_active());

        event_loop.advance(Duration::from_millis(1)).await;
        assert!(!window.is_active());
        assert!(window.deadline().is_none());

        event_loop.advance(Duration::from_millis(10_000)).await;
        assert!(!window.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_window_extends_from_latest_gesture() {
        let (event_loop, window) = window(WindowMode::Rolling);
        window.record_gesture();
        event_loop.advance(Duration::from_millis(1_000)).await;
        window.record_gesture();

        event_loop.advance(Duration::from_millis(4_500)).await;
        assert!(window.is_active(), "second gesture should keep the window open");

        event_loop.advance(Duration::from_millis(500)).await;
        assert!(!window.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_window_closes_on_first_expiry() {
        let (event_loop, window) = window(WindowMode::Independent);
        window.record_gesture();
        event_loop.advance(Duration::from_millis(1_000)).await;
        window.record_gesture();

        event_loop.advance(Duration::from_millis(4_000)).await;
        assert!(!window.is_active());
    }
}
