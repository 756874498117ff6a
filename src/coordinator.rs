use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, info};

use crate::dom::Document;
use crate::host::Page;
use crate::storage::{FlagStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    On,
    Off,
}

impl Badge {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Badge::On
        } else {
            Badge::Off
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Badge::On => "ON",
            Badge::Off => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

struct OpenContext {
    id: ContextId,
    document: Rc<Document>,
    is_web: bool,
    badge: Cell<Badge>,
}

/// The global on/off switch shared by every open page.
///
/// Flipping it persists the flag (which every installed engine follows),
/// updates each page's badge and, when turning on, pauses whatever is already
/// playing in every web page.
pub struct ToggleCoordinator {
    flags: Rc<dyn FlagStore>,
    key: String,
    contexts: RefCell<Vec<OpenContext>>,
    next_id: Cell<u64>,
}

impl ToggleCoordinator {
    pub fn new(flags: Rc<dyn FlagStore>, key: impl Into<String>) -> Self {
        Self {
            flags,
            key: key.into(),
            contexts: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn is_enabled(&self) -> Result<bool, StorageError> {
        Ok(self.flags.load(&self.key)?.unwrap_or(false))
    }

    pub fn open_context(&self, page: &Page) -> Result<ContextId, StorageError> {
        let id = ContextId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let badge = Badge::from_enabled(self.is_enabled()?);
        self.contexts.borrow_mut().push(OpenContext {
            id,
            document: Rc::clone(&page.document),
            is_web: page.is_web(),
            badge: Cell::new(badge),
        });
        Ok(id)
    }

    pub fn close_context(&self, id: ContextId) -> bool {
        let mut contexts = self.contexts.borrow_mut();
        let before = contexts.len();
        contexts.retain(|context| context.id != id);
        contexts.len() != before
    }

    pub fn badge(&self, id: ContextId) -> Option<Badge> {
        self.contexts
            .borrow()
            .iter()
            .find(|context| context.id == id)
            .map(|context| context.badge.get())
    }

    /// Re-derive one context's badge from the flag, as on tab activation.
    pub fn refresh_badge(&self, id: ContextId) -> Result<Option<Badge>, StorageError> {
        let badge = Badge::from_enabled(self.is_enabled()?);
        let contexts = self.contexts.borrow();
        let Some(context) = contexts.iter().find(|context| context.id == id) else {
            return Ok(None);
        };
        context.badge.set(badge);
        Ok(Some(badge))
    }

    /// Flip the flag; returns the new value.
    pub fn toggle(&self) -> Result<bool, StorageError> {
        let next = !self.is_enabled()?;
        self.flags.store(&self.key, next)?;

        let badge = Badge::from_enabled(next);
        for context in self.contexts.borrow().iter() {
            context.badge.set(badge);
        }
        if next {
            let paused = self.pause_all();
            debug!(target: "coordinator", paused, "paused media in open pages");
        }
        info!(target: "coordinator", enabled = next, "toggled autoplay suppression");
        Ok(next)
    }

    /// Pause every media element in every open web page; failures are
    /// ignored. Returns how many pauses succeeded.
    pub fn pause_all(&self) -> usize {
        let documents: Vec<Rc<Document>> = self
            .contexts
            .borrow()
            .iter()
            .filter(|context| context.is_web)
            .map(|context| Rc::clone(&context.document))
            .collect();
        documents
            .iter()
            .flat_map(|document| document.query_media())
            .filter(|media| media.pause().is_ok())
            .count()
    }
}
