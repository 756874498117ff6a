use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::{ElementRegistry, WireOutcome};
use crate::dom::{NodeId, NodeRef};
use crate::host::Scheduler;

/// Insertion-ordered set of nodes waiting for the next flush.
#[derive(Default)]
struct PendingSet {
    nodes: Vec<NodeRef>,
    seen: HashSet<NodeId>,
}

impl PendingSet {
    fn insert(&mut self, node: NodeRef) -> bool {
        if !self.seen.insert(node.id()) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Coalesces mutation bursts into one wiring pass per microtask checkpoint.
pub struct MutationBatcher {
    this: Weak<MutationBatcher>,
    pending: RefCell<PendingSet>,
    scheduled: Cell<bool>,
    flushes: Cell<u64>,
    scheduler: Rc<dyn Scheduler>,
    registry: Rc<ElementRegistry>,
}

impl MutationBatcher {
    pub fn new(scheduler: Rc<dyn Scheduler>, registry: Rc<ElementRegistry>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            pending: RefCell::new(PendingSet::default()),
            scheduled: Cell::new(false),
            flushes: Cell::new(0),
            scheduler,
            registry,
        })
    }

    pub fn enqueue(&self, node: NodeRef) {
        self.pending.borrow_mut().insert(node);
        if self.scheduled.get() {
            return;
        }
        self.scheduled.set(true);
        let batcher = self.this.clone();
        self.scheduler.queue_microtask(Box::new(move || {
            if let Some(batcher) = batcher.upgrade() {
                batcher.flush();
            }
        }));
    }

    /// Wire everything accumulated since the previous flush. Nodes enqueued
    /// while this runs go into a fresh round.
    fn flush(&self) -> usize {
        self.scheduled.set(false);
        let taken = std::mem::take(&mut *self.pending.borrow_mut());
        if taken.is_empty() {
            return 0;
        }
        self.flushes.set(self.flushes.get() + 1);

        let nodes = taken.len();
        let mut wired = 0usize;
        for node in taken.nodes {
            let candidates = if node.is_media() {
                vec![node]
            } else {
                node.query_media()
            };
            for media in candidates {
                if self.registry.wire(&media) == WireOutcome::Wired {
                    wired += 1;
                }
            }
        }
        let pruned = self.registry.prune();
        debug!(target: "engine", nodes, wired, pruned, "flushed pending mutations");
        wired
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.get()
    }

    /// Flushes that processed at least one node.
    pub fn flush_count(&self) -> u64 {
        self.flushes.get()
    }
}
