//! The page host: event loop plus the page a content engine is attached to.

mod event_loop;

use std::rc::Rc;

use url::Url;

use crate::dom::{Document, LocalStorage, SitePreferences};

pub use event_loop::{EventLoop, Scheduler, Task, TimerId};

/// One open page: its loop, document, location and site storage.
pub struct Page {
    pub event_loop: Rc<EventLoop>,
    pub document: Rc<Document>,
    pub location: Url,
    pub local_storage: Rc<LocalStorage>,
}

impl Page {
    pub fn new(location: Url) -> Self {
        let event_loop = Rc::new(EventLoop::new());
        let document = Rc::new(Document::new(event_loop.clone()));
        Self::assemble(event_loop, document, location)
    }

    pub fn from_html(location: Url, html: &str) -> Self {
        let event_loop = Rc::new(EventLoop::new());
        let document = Rc::new(Document::from_html(html, event_loop.clone()));
        Self::assemble(event_loop, document, location)
    }

    fn assemble(event_loop: Rc<EventLoop>, document: Rc<Document>, location: Url) -> Self {
        Self {
            event_loop,
            document,
            location,
            local_storage: Rc::new(LocalStorage::new()),
        }
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.event_loop.clone()
    }

    pub fn preferences(&self) -> Rc<dyn SitePreferences> {
        self.local_storage.clone()
    }

    /// Whether this is an ordinary web page (`http`/`https`).
    pub fn is_web(&self) -> bool {
        matches!(self.location.scheme(), "http" | "https")
    }
}
