use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use super::MutationBatcher;
use crate::dom::{MutationCallback, MutationRecord, MutationSource, ObserveOptions, ObserverId};

/// Feeds inserted nodes and watched attribute changes to the batcher.
/// While stopped it holds no observer at all.
pub struct TreeWatcher {
    source: Rc<dyn MutationSource>,
    batcher: Rc<MutationBatcher>,
    attribute_filter: Vec<String>,
    observer: Cell<Option<ObserverId>>,
    deliveries: Rc<Cell<u64>>,
}

impl TreeWatcher {
    pub fn new(
        source: Rc<dyn MutationSource>,
        batcher: Rc<MutationBatcher>,
        attribute_filter: Vec<String>,
    ) -> Self {
        Self {
            source,
            batcher,
            attribute_filter,
            observer: Cell::new(None),
            deliveries: Rc::new(Cell::new(0)),
        }
    }

    /// Begin observing. Returns `false` if already observing.
    pub fn start(&self) -> bool {
        if self.is_observing() {
            return false;
        }
        let batcher = Rc::clone(&self.batcher);
        let deliveries = Rc::clone(&self.deliveries);
        let callback: MutationCallback = Rc::new(move |records| {
            deliveries.set(deliveries.get() + 1);
            for record in records {
                match record {
                    MutationRecord::ChildList { added, .. } => {
                        for node in added {
                            batcher.enqueue(node);
                        }
                    }
                    MutationRecord::Attributes { target, .. } => {
                        if target.is_media() {
                            batcher.enqueue(target);
                        }
                    }
                }
            }
        });
        let id = self.source.observe(
            ObserveOptions {
                child_list: true,
                attribute_filter: self.attribute_filter.clone(),
            },
            callback,
        );
        self.observer.set(Some(id));
        debug!(target: "engine", "tree watcher started");
        true
    }

    /// Stop observing. Returns `false` if not observing.
    pub fn stop(&self) -> bool {
        let Some(id) = self.observer.take() else {
            return false;
        };
        self.source.disconnect(id);
        debug!(target: "engine", "tree watcher stopped");
        true
    }

    pub fn is_observing(&self) -> bool {
        self.observer.get().is_some()
    }

    /// Mutation batches received since construction.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.get()
    }
}
