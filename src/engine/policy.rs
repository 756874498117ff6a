use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use super::{EngineState, PermissionWindow};
use crate::dom::{NodeRef, Preload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackVerdict {
    /// The engine is disabled; nothing was checked.
    Inert,
    /// A gesture window is open; playback proceeds.
    Allowed,
    /// Playback was stopped.
    Suppressed,
}

/// Decides whether a playback start is allowed and applies the hard stop
/// when it is not. Mute state is never touched.
pub struct SuppressionPolicy {
    state: Rc<EngineState>,
    window: Rc<PermissionWindow>,
    suppressions: Cell<u64>,
}

impl SuppressionPolicy {
    pub fn new(state: Rc<EngineState>, window: Rc<PermissionWindow>) -> Self {
        Self {
            state,
            window,
            suppressions: Cell::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub fn gesture_active(&self) -> bool {
        self.window.is_active()
    }

    pub fn suppression_count(&self) -> u64 {
        self.suppressions.get()
    }

    pub fn on_playback_attempt(&self, element: &NodeRef) -> PlaybackVerdict {
        if !self.is_enabled() {
            return PlaybackVerdict::Inert;
        }
        if self.gesture_active() {
            debug!(target: "engine", node = ?element.id(), "playback follows a gesture");
            return PlaybackVerdict::Allowed;
        }
        self.hard_stop(element);
        PlaybackVerdict::Suppressed
    }

    /// Pause, drop the autoplay declaration and lower preload.
    pub fn hard_stop(&self, element: &NodeRef) {
        self.suppressions.set(self.suppressions.get() + 1);
        if let Err(err) = element.pause() {
            debug!(target: "engine", node = ?element.id(), error = %err, "pause rejected");
        }
        clear_autoplay(element);
        lower_preload(element);
        debug!(target: "engine", node = ?element.id(), "suppressed playback");
    }

    /// Returns whether anything was changed.
    pub fn sanitize(&self, element: &NodeRef) -> bool {
        let cleared = clear_autoplay(element);
        let lowered = lower_preload(element);
        cleared || lowered
    }

    /// Sanitize, then stop the element if it is already playing without a
    /// gesture. Does nothing while disabled.
    pub fn refresh(&self, element: &NodeRef) {
        if !self.is_enabled() {
            return;
        }
        self.sanitize(element);
        if !self.gesture_active() && !element.paused() {
            self.hard_stop(element);
        }
    }
}

fn clear_autoplay(element: &NodeRef) -> bool {
    if !element.autoplay() && !element.has_attribute("autoplay") {
        return false;
    }
    element.set_autoplay(false);
    element.remove_attribute("autoplay");
    true
}

fn lower_preload(element: &NodeRef) -> bool {
    if element.preload() <= Preload::Metadata {
        return false;
    }
    element.set_preload(Preload::Metadata);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::WindowMode;
    use crate::dom::Document;
    use crate::host::EventLoop;

    struct Fixture {
        document: Document,
        state: Rc<EngineState>,
        window: Rc<PermissionWindow>,
        policy: SuppressionPolicy,
    }

    fn fixture(enabled: bool) -> Fixture {
        let event_loop = Rc::new(EventLoop::new());
        let document = Document::new(event_loop.clone());
        let state = Rc::new(EngineState::default());
        state.set_enabled(enabled);
        let window = PermissionWindow::new(
            Duration::from_millis(5_000),
            WindowMode::Rolling,
            event_loop,
        );
        let policy = SuppressionPolicy::new(Rc::clone(&state), Rc::clone(&window));
        Fixture {
            document,
            state,
            window,
            policy,
        }
    }

    fn playing_video(document: &Document) -> NodeRef {
        let video = document.create_element("video");
        video.set_attribute("autoplay", "");
        video.set_attribute("preload", "auto");
        video.play().unwrap();
        video
    }

    #[test]
    fn hard_stop_is_idempotent() {
        let fx = fixture(true);
        let video = playing_video(&fx.document);

        fx.policy.hard_stop(&video);
        let once = (video.paused(), video.attributes());
        fx.policy.hard_stop(&video);
        let twice = (video.paused(), video.attributes());

        assert_eq!(once, twice);
        assert!(video.paused());
        assert!(!video.autoplay());
        assert_eq!(video.preload(), Preload::Metadata);
    }

    #[test]
    fn hard_stop_tolerates_rejected_pause() {
        let fx = fixture(true);
        let video = playing_video(&fx.document);
        video.set_pause_rejected(true);

        fx.policy.hard_stop(&video);
        assert!(!video.paused());
        assert!(!video.has_attribute("autoplay"));
        assert_eq!(video.preload(), Preload::Metadata);
    }

    #[test]
    fn disabled_policy_is_inert() {
        let fx = fixture(false);
        let video = playing_video(&fx.document);
        assert_eq!(fx.policy.on_playback_attempt(&video), PlaybackVerdict::Inert);
        assert!(!video.paused());
        assert!(video.autoplay());
        assert_eq!(fx.policy.suppression_count(), 0);
    }

    #[test]
    fn gesture_allows_playback() {
        let fx = fixture(true);
        let video = playing_video(&fx.document);
        fx.window.record_gesture();
        assert_eq!(fx.policy.on_playback_attempt(&video), PlaybackVerdict::Allowed);
        assert!(!video.paused());
    }

    #[test]
    fn sanitize_never_raises_preload() {
        let fx = fixture(true);
        let audio = fx.document.create_element("audio");
        audio.set_attribute("preload", "none");
        assert!(!fx.policy.sanitize(&audio));
        assert_eq!(audio.preload(), Preload::None);
    }

    #[test]
    fn refresh_stops_playing_element_without_gesture() {
        let fx = fixture(true);
        let video = playing_video(&fx.document);
        fx.policy.refresh(&video);
        assert!(video.paused());

        fx.state.set_enabled(false);
        video.play().unwrap();
        fx.policy.refresh(&video);
        assert!(!video.paused());
    }

    #[test]
    fn muted_attribute_is_left_alone() {
        let fx = fixture(true);
        let video = playing_video(&fx.document);
        video.set_attribute("muted", "");
        fx.policy.hard_stop(&video);
        assert!(video.has_attribute("muted"));
    }
}
