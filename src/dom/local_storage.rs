use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage access denied")]
    Denied,
}

/// Per-site preference store the page exposes to scripts.
pub trait SitePreferences {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
}

/// In-memory `localStorage`, with switches for the failures real browsers
/// produce (full quota, storage blocked).
#[derive(Debug, Default)]
pub struct LocalStorage {
    items: RefCell<BTreeMap<String, String>>,
    quota: Cell<Option<usize>>,
    denied: Cell<bool>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total size of keys plus values, in bytes.
    pub fn set_quota(&self, quota: Option<usize>) {
        self.quota.set(quota);
    }

    pub fn set_denied(&self, denied: bool) {
        self.denied.set(denied);
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.items
            .borrow()
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl SitePreferences for LocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        if self.denied.get() {
            return None;
        }
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        if self.denied.get() {
            return Err(PreferenceError::Denied);
        }
        if let Some(quota) = self.quota.get() {
            if self.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(PreferenceError::QuotaExceeded);
            }
        }
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
