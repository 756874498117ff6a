//! The in-page suppression engine.
//!
//! Media elements are wired once with a play interceptor; the interceptor
//! stops any playback start that does not follow a recent user gesture while
//! the engine is enabled. New elements are found through batched tree
//! mutations and wired in one pass per microtask checkpoint.

mod batcher;
mod controller;
mod navigation_hint;
mod permission;
mod policy;
mod registry;
mod watcher;

use std::cell::Cell;

pub use batcher::MutationBatcher;
pub use controller::{EngineController, Transition};
pub use navigation_hint::NavigationHint;
pub use permission::PermissionWindow;
pub use policy::{PlaybackVerdict, SuppressionPolicy};
pub use registry::{ElementRegistry, WireOutcome};
pub use watcher::TreeWatcher;

/// Whether suppression is currently on for this page.
#[derive(Debug, Default)]
pub struct EngineState {
    enabled: Cell<bool>,
}

impl EngineState {
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }
}
