use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::SuppressionPolicy;
use crate::dom::{ListenerId, Node, NodeId, NodeRef, PlayListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireOutcome {
    /// Not a media element.
    Ignored,
    /// First sight: interceptor attached.
    Wired,
    /// Already wired: state re-applied, no new interceptor.
    Refreshed,
}

struct WiredEntry {
    element: Weak<Node>,
    handler: ListenerId,
}

/// Which elements carry a play interceptor, keyed by node identity.
///
/// Entries hold weak references only; a removed element that nothing else
/// references is freed, and its entry is dropped on the next `prune`.
pub struct ElementRegistry {
    entries: RefCell<HashMap<NodeId, WiredEntry>>,
    policy: Rc<SuppressionPolicy>,
}

impl ElementRegistry {
    pub fn new(policy: Rc<SuppressionPolicy>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            policy,
        }
    }

    pub fn wire(&self, element: &NodeRef) -> WireOutcome {
        if !element.is_media() {
            return WireOutcome::Ignored;
        }
        if self.is_wired(element) {
            self.policy.refresh(element);
            return WireOutcome::Refreshed;
        }

        let policy = Rc::clone(&self.policy);
        let interceptor: PlayListener = Rc::new(move |target: &NodeRef| {
            policy.on_playback_attempt(target);
        });
        let Ok(handler) = element.add_play_listener(interceptor) else {
            return WireOutcome::Ignored;
        };
        self.entries.borrow_mut().insert(
            element.id(),
            WiredEntry {
                element: Rc::downgrade(element),
                handler,
            },
        );

        self.policy.refresh(element);
        debug!(target: "engine", node = ?element.id(), "wired media element");
        WireOutcome::Wired
    }

    /// Remove the interceptor. Returns `false` for elements never wired.
    pub fn unwire(&self, element: &NodeRef) -> bool {
        let Some(entry) = self.entries.borrow_mut().remove(&element.id()) else {
            return false;
        };
        element.remove_play_listener(entry.handler);
        true
    }

    pub fn is_wired(&self, element: &NodeRef) -> bool {
        self.entries
            .borrow()
            .get(&element.id())
            .is_some_and(|entry| entry.element.strong_count() > 0)
    }

    pub fn handler(&self, element: &NodeRef) -> Option<ListenerId> {
        self.entries
            .borrow()
            .get(&element.id())
            .map(|entry| entry.handler)
    }

    /// Wired elements that are still alive.
    pub fn live_count(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|entry| entry.element.strong_count() > 0)
            .count()
    }

    /// Entries held, including ones whose element is gone but not yet pruned.
    pub fn entry_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Drop entries whose element has been freed; returns how many.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.element.strong_count() > 0);
        before - entries.len()
    }
}
