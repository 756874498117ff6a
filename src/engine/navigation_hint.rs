use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};
use url::Url;

use super::SuppressionPolicy;
use crate::config::NavigationHintConfig;
use crate::dom::{Document, SitePreferences};
use crate::host::Scheduler;

/// Best-effort nudges for single-page-app video sites whose in-page
/// navigations start a new video without inserting a new element.
///
/// Nothing here can fail the engine: preference writes are advisory and a
/// missing settle event just leaves the delayed load check to do the work.
pub struct NavigationHint {
    this: Weak<NavigationHint>,
    config: NavigationHintConfig,
    location: Url,
    document: Rc<Document>,
    scheduler: Rc<dyn Scheduler>,
    preferences: Rc<dyn SitePreferences>,
    policy: Rc<SuppressionPolicy>,
    listening: Cell<bool>,
}

impl NavigationHint {
    pub fn new(
        config: NavigationHintConfig,
        location: Url,
        document: Rc<Document>,
        scheduler: Rc<dyn Scheduler>,
        preferences: Rc<dyn SitePreferences>,
        policy: Rc<SuppressionPolicy>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            location,
            document,
            scheduler,
            preferences,
            policy,
            listening: Cell::new(false),
        })
    }

    pub fn applies(&self) -> bool {
        self.config.enabled
            && self
                .location
                .host_str()
                .is_some_and(|host| self.config.matches_host(host))
    }

    /// Returns whether the page's host was recognized.
    pub fn apply(&self) -> bool {
        if !self.applies() {
            return false;
        }
        let written = self.write_preferences();
        trace!(target: "engine", written, "wrote site preferences");

        if !self.listening.get() {
            let hint = self.this.clone();
            self.document.add_event_listener(
                &self.config.settle_event,
                Rc::new(move || {
                    if let Some(hint) = hint.upgrade() {
                        hint.schedule_nudge(hint.config.settle_delay());
                    }
                }),
            );
            self.listening.set(true);
        }
        self.schedule_nudge(self.config.load_check_delay());
        true
    }

    fn write_preferences(&self) -> usize {
        let mut written = 0usize;
        for (key, value) in &self.config.preferences {
            match self.preferences.set_item(key, value) {
                Ok(()) => written += 1,
                Err(err) => {
                    debug!(target: "engine", %key, error = %err, "site preference write rejected");
                }
            }
        }
        written
    }

    fn schedule_nudge(&self, delay: Duration) {
        let hint = self.this.clone();
        self.scheduler.set_timeout(
            delay,
            Box::new(move || {
                if let Some(hint) = hint.upgrade() {
                    hint.nudge();
                }
            }),
        );
    }

    /// Stop the page's primary player unless a gesture excuses it.
    fn nudge(&self) -> bool {
        if !self.policy.is_enabled() || self.policy.gesture_active() {
            return false;
        }
        let Some(player) = self.document.query_tag("video") else {
            return false;
        };
        self.policy.hard_stop(&player);
        true
    }
}
