mod sqlite;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

pub use sqlite::SqliteFlagStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unable to determine data directory")]
    DataDir,
}

pub type FlagListener = Rc<dyn Fn(bool)>;

/// Persisted boolean flags shared by every open page.
///
/// Every successful `store` notifies the key's subscribers, including writes
/// that re-confirm the current value.
pub trait FlagStore {
    fn load(&self, key: &str) -> Result<Option<bool>, StorageError>;
    fn store(&self, key: &str, value: bool) -> Result<(), StorageError>;
    fn subscribe(&self, key: &str, listener: FlagListener);
}

#[derive(Default)]
pub(crate) struct Subscribers {
    listeners: RefCell<Vec<(String, FlagListener)>>,
}

impl Subscribers {
    pub(crate) fn add(&self, key: &str, listener: FlagListener) {
        self.listeners.borrow_mut().push((key.to_string(), listener));
    }

    pub(crate) fn notify(&self, key: &str, value: bool) {
        let listeners: Vec<FlagListener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(subscribed, _)| subscribed == key)
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(value);
        }
    }
}

/// In-process flag store.
#[derive(Default)]
pub struct MemoryFlagStore {
    values: RefCell<HashMap<String, bool>>,
    subscribers: Subscribers,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: bool) -> Self {
        let store = Self::default();
        store.values.borrow_mut().insert(key.to_string(), value);
        store
    }
}

impl FlagStore for MemoryFlagStore {
    fn load(&self, key: &str) -> Result<Option<bool>, StorageError> {
        Ok(self.values.borrow().get(key).copied())
    }

    fn store(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.values.borrow_mut().insert(key.to_string(), value);
        self.subscribers.notify(key, value);
        Ok(())
    }

    fn subscribe(&self, key: &str, listener: FlagListener) {
        self.subscribers.add(key, listener);
    }
}
