//! In-memory document tree the engine runs against.
//!
//! Nodes are reference counted; parents own their children and children keep
//! a weak back-pointer. Media elements (`video`, `audio`) carry playback state
//! and play listeners. Mutation observation follows the DOM model: records are
//! queued per observer and delivered together in a microtask.

mod html;
mod local_storage;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::host::Scheduler;

pub use local_storage::{LocalStorage, PreferenceError, SitePreferences};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub type NodeRef = Rc<Node>;
pub type PlayListener = Rc<dyn Fn(&NodeRef)>;
pub type EventListener = Rc<dyn Fn()>;
pub type MutationCallback = Rc<dyn Fn(Vec<MutationRecord>)>;

const MEDIA_TAGS: &[&str] = &["video", "audio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MediaError {
    #[error("node is not a media element")]
    NotMedia,
    #[error("media element cannot be paused in its current state")]
    InvalidState,
}

/// The `preload` hint, ordered from least to most eager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Preload {
    None,
    Metadata,
    Auto,
}

impl Preload {
    /// Parse an attribute value; a missing or unknown value means `auto`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "none" => Preload::None,
            Some(v) if v == "metadata" => Preload::Metadata,
            _ => Preload::Auto,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Preload::None => "none",
            Preload::Metadata => "metadata",
            Preload::Auto => "auto",
        }
    }
}

/// User input kinds delivered by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    PointerDown,
    MouseDown,
    KeyDown,
    TouchStart,
    PointerMove,
    Wheel,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::PointerDown => "pointerdown",
            InputKind::MouseDown => "mousedown",
            InputKind::KeyDown => "keydown",
            InputKind::TouchStart => "touchstart",
            InputKind::PointerMove => "pointermove",
            InputKind::Wheel => "wheel",
        }
    }
}

#[derive(Clone)]
pub enum MutationRecord {
    ChildList { target: NodeRef, added: Vec<NodeRef> },
    Attributes { target: NodeRef, name: String },
}

impl fmt::Debug for MutationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationRecord::ChildList { target, added } => f
                .debug_struct("ChildList")
                .field("target", &target.id())
                .field("added", &added.len())
                .finish(),
            MutationRecord::Attributes { target, name } => f
                .debug_struct("Attributes")
                .field("target", &target.id())
                .field("name", name)
                .finish(),
        }
    }
}

/// What an observer wants to hear about. Only attributes named in
/// `attribute_filter` are reported; an empty filter reports none.
#[derive(Debug, Clone, Default)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attribute_filter: Vec<String>,
}

/// Tree-mutation port.
pub trait MutationSource {
    fn observe(&self, options: ObserveOptions, callback: MutationCallback) -> ObserverId;
    fn disconnect(&self, id: ObserverId) -> bool;
}

/// User-input port.
pub trait InputSource {
    fn add_input_listener(&self, kind: InputKind, listener: EventListener) -> ListenerId;
}

enum NodeKind {
    Document,
    Element { tag: String },
    Text(RefCell<String>),
}

struct MediaState {
    paused: Cell<bool>,
    pause_rejected: Cell<bool>,
    pause_calls: Cell<u32>,
    play_listeners: RefCell<Vec<(ListenerId, PlayListener)>>,
}

impl MediaState {
    fn new() -> Self {
        Self {
            paused: Cell::new(true),
            pause_rejected: Cell::new(false),
            pause_calls: Cell::new(0),
            play_listeners: RefCell::new(Vec::new()),
        }
    }
}

pub struct Node {
    id: NodeId,
    this: Weak<Node>,
    kind: NodeKind,
    attributes: RefCell<Vec<(String, String)>>,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<NodeRef>>,
    owner: Weak<DocumentShared>,
    media: Option<MediaState>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("tag", &self.tag_name())
            .finish()
    }
}

impl Node {
    fn new(kind: NodeKind, owner: Weak<DocumentShared>) -> NodeRef {
        let media = match &kind {
            NodeKind::Element { tag } if MEDIA_TAGS.contains(&tag.as_str()) => {
                Some(MediaState::new())
            }
            _ => None,
        };
        Rc::new_cyclic(|this| Node {
            id: NodeId(next_id()),
            this: this.clone(),
            kind,
            attributes: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            owner,
            media,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag } => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub fn is_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn text(&self) -> Option<String> {
        match &self.kind {
            NodeKind::Text(data) => Some(data.borrow().clone()),
            _ => None,
        }
    }

    // -- attributes ---------------------------------------------------------

    pub fn attributes(&self) -> Vec<(String, String)> {
        self.attributes.borrow().clone()
    }

    pub fn get_attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .borrow()
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .borrow()
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        if !self.is_element() {
            return;
        }
        let name = name.to_ascii_lowercase();
        {
            let mut attributes = self.attributes.borrow_mut();
            match attributes.iter_mut().find(|(key, _)| *key == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => attributes.push((name.clone(), value.to_string())),
            }
        }
        self.attribute_changed(name);
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let removed = {
            let mut attributes = self.attributes.borrow_mut();
            let before = attributes.len();
            attributes.retain(|(key, _)| *key != name);
            attributes.len() != before
        };
        if removed {
            self.attribute_changed(name);
        }
        removed
    }

    fn attribute_changed(&self, name: String) {
        if !self.is_connected() {
            return;
        }
        if let (Some(owner), Some(target)) = (self.owner.upgrade(), self.this.upgrade()) {
            owner.queue_record(MutationRecord::Attributes { target, name });
        }
    }

    // -- media --------------------------------------------------------------

    /// Reflects the `autoplay` attribute.
    pub fn autoplay(&self) -> bool {
        self.is_media() && self.has_attribute("autoplay")
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        if !self.is_media() {
            return;
        }
        if autoplay {
            self.set_attribute("autoplay", "");
        } else {
            self.remove_attribute("autoplay");
        }
    }

    /// Reflects the `preload` attribute.
    pub fn preload(&self) -> Preload {
        Preload::parse(self.get_attribute("preload").as_deref())
    }

    pub fn set_preload(&self, preload: Preload) {
        if self.is_media() {
            self.set_attribute("preload", preload.as_str());
        }
    }

    pub fn paused(&self) -> bool {
        self.media.as_ref().map_or(true, |media| media.paused.get())
    }

    /// Start playback and notify play listeners, which may pause it again.
    pub fn play(&self) -> Result<(), MediaError> {
        let media = self.media.as_ref().ok_or(MediaError::NotMedia)?;
        media.paused.set(false);
        let listeners: Vec<PlayListener> = media
            .play_listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        if let Some(this) = self.this.upgrade() {
            for listener in listeners {
                listener(&this);
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), MediaError> {
        let media = self.media.as_ref().ok_or(MediaError::NotMedia)?;
        media.pause_calls.set(media.pause_calls.get() + 1);
        if media.pause_rejected.get() {
            return Err(MediaError::InvalidState);
        }
        media.paused.set(true);
        Ok(())
    }

    /// Make subsequent `pause` calls fail, as a player in a transitional
    /// state would.
    pub fn set_pause_rejected(&self, rejected: bool) {
        if let Some(media) = &self.media {
            media.pause_rejected.set(rejected);
        }
    }

    pub fn pause_calls(&self) -> u32 {
        self.media.as_ref().map_or(0, |media| media.pause_calls.get())
    }

    pub fn add_play_listener(&self, listener: PlayListener) -> Result<ListenerId, MediaError> {
        let media = self.media.as_ref().ok_or(MediaError::NotMedia)?;
        let id = ListenerId(next_id());
        media.play_listeners.borrow_mut().push((id, listener));
        Ok(id)
    }

    pub fn remove_play_listener(&self, id: ListenerId) -> bool {
        let Some(media) = &self.media else {
            return false;
        };
        let mut listeners = media.play_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn play_listener_count(&self) -> usize {
        self.media
            .as_ref()
            .map_or(0, |media| media.play_listeners.borrow().len())
    }

    // -- tree ---------------------------------------------------------------

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.borrow().upgrade()
    }

    pub fn children(&self) -> Vec<NodeRef> {
        self.children.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        let mut current = self.this.upgrade();
        while let Some(node) = current {
            if matches!(node.kind, NodeKind::Document) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Append `child`, moving it from any previous parent. Returns `false`
    /// without changing the tree when `self` is a text node or when `child`
    /// is `self` or one of its ancestors.
    pub fn append_child(&self, child: &NodeRef) -> bool {
        if matches!(self.kind, NodeKind::Text(_)) || self.is_inclusive_descendant_of(child) {
            return false;
        }
        if let Some(previous) = child.parent() {
            previous.detach(child);
        }
        *child.parent.borrow_mut() = self.this.clone();
        self.children.borrow_mut().push(Rc::clone(child));

        if !self.is_connected() {
            return true;
        }
        if let (Some(owner), Some(target)) = (self.owner.upgrade(), self.this.upgrade()) {
            owner.queue_record(MutationRecord::ChildList {
                target,
                added: vec![Rc::clone(child)],
            });
            owner.connected(child);
        }
        true
    }

    fn is_inclusive_descendant_of(&self, other: &NodeRef) -> bool {
        let mut current = self.this.upgrade();
        while let Some(node) = current {
            if Rc::ptr_eq(&node, other) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    pub fn remove_child(&self, child: &NodeRef) -> bool {
        let removed = self.detach(child);
        if removed {
            *child.parent.borrow_mut() = Weak::new();
        }
        removed
    }

    fn detach(&self, child: &NodeRef) -> bool {
        let mut children = self.children.borrow_mut();
        let before = children.len();
        children.retain(|existing| !Rc::ptr_eq(existing, child));
        children.len() != before
    }

    /// Every descendant in tree order, excluding `self`.
    pub fn descendants(&self) -> Vec<NodeRef> {
        let mut collected = Vec::new();
        let mut stack: Vec<NodeRef> = self.children().into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            collected.push(node);
        }
        collected
    }

    /// Media elements below this node, in tree order.
    pub fn query_media(&self) -> Vec<NodeRef> {
        self.descendants()
            .into_iter()
            .filter(|node| node.is_media())
            .collect()
    }

    pub fn query_tag(&self, tag: &str) -> Option<NodeRef> {
        self.descendants()
            .into_iter()
            .find(|node| node.tag_name() == Some(tag))
    }
}

struct ObserverSlot {
    id: ObserverId,
    options: ObserveOptions,
    callback: MutationCallback,
    pending: Vec<MutationRecord>,
}

impl ObserverSlot {
    fn wants(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { .. } => self.options.child_list,
            MutationRecord::Attributes { name, .. } => {
                self.options.attribute_filter.iter().any(|f| f == name)
            }
        }
    }
}

struct DocumentShared {
    this: Weak<DocumentShared>,
    scheduler: Rc<dyn Scheduler>,
    observers: RefCell<Vec<ObserverSlot>>,
    delivery_scheduled: Cell<bool>,
    listeners: RefCell<Vec<(String, ListenerId, EventListener)>>,
    honor_autoplay: Cell<bool>,
}

impl DocumentShared {
    fn queue_record(&self, record: MutationRecord) {
        let mut queued = false;
        for observer in self.observers.borrow_mut().iter_mut() {
            if observer.wants(&record) {
                observer.pending.push(record.clone());
                queued = true;
            }
        }
        if !queued || self.delivery_scheduled.get() {
            return;
        }
        self.delivery_scheduled.set(true);
        let shared = self.this.clone();
        self.scheduler.queue_microtask(Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.deliver();
            }
        }));
    }

    fn deliver(&self) {
        self.delivery_scheduled.set(false);
        let batches: Vec<(MutationCallback, Vec<MutationRecord>)> = self
            .observers
            .borrow_mut()
            .iter_mut()
            .filter(|observer| !observer.pending.is_empty())
            .map(|observer| {
                (
                    Rc::clone(&observer.callback),
                    std::mem::take(&mut observer.pending),
                )
            })
            .collect();
        for (callback, records) in batches {
            trace!(target: "dom", records = records.len(), "delivering mutation records");
            callback(records);
        }
    }

    /// Model the browser's own autoplay: a connected media element that still
    /// declares autoplay when the next task runs starts playing.
    fn connected(&self, node: &NodeRef) {
        if !self.honor_autoplay.get() {
            return;
        }
        let mut candidates = node.query_media();
        if node.is_media() {
            candidates.insert(0, Rc::clone(node));
        }
        for media in candidates.into_iter().filter(|media| media.autoplay()) {
            let media = Rc::downgrade(&media);
            self.scheduler.set_timeout(
                Duration::ZERO,
                Box::new(move || {
                    let Some(media) = media.upgrade() else {
                        return;
                    };
                    if media.is_connected() && media.autoplay() && media.paused() {
                        let _ = media.play();
                    }
                }),
            );
        }
    }
}

pub struct Document {
    root: NodeRef,
    shared: Rc<DocumentShared>,
    has_doctype: Cell<bool>,
}

impl Document {
    /// A document with an empty `html`/`head`/`body` skeleton.
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        let document = Self::empty(scheduler);
        let html = document.create_element("html");
        html.append_child(&document.create_element("head"));
        html.append_child(&document.create_element("body"));
        document.root.append_child(&html);
        document
    }

    fn empty(scheduler: Rc<dyn Scheduler>) -> Self {
        let shared = Rc::new_cyclic(|this| DocumentShared {
            this: this.clone(),
            scheduler,
            observers: RefCell::new(Vec::new()),
            delivery_scheduled: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            honor_autoplay: Cell::new(true),
        });
        let root = Node::new(NodeKind::Document, Rc::downgrade(&shared));
        Self {
            root,
            shared,
            has_doctype: Cell::new(false),
        }
    }

    pub fn create_element(&self, tag: &str) -> NodeRef {
        Node::new(
            NodeKind::Element {
                tag: tag.to_ascii_lowercase(),
            },
            Rc::downgrade(&self.shared),
        )
    }

    pub fn create_text(&self, data: &str) -> NodeRef {
        Node::new(
            NodeKind::Text(RefCell::new(data.to_string())),
            Rc::downgrade(&self.shared),
        )
    }

    pub fn root(&self) -> NodeRef {
        Rc::clone(&self.root)
    }

    pub fn body(&self) -> Option<NodeRef> {
        self.root.query_tag("body")
    }

    pub fn query_media(&self) -> Vec<NodeRef> {
        self.root.query_media()
    }

    pub fn query_tag(&self, tag: &str) -> Option<NodeRef> {
        self.root.query_tag(tag)
    }

    /// Whether connected autoplay elements start playing on their own.
    pub fn set_autoplay_honored(&self, honored: bool) {
        self.shared.honor_autoplay.set(honored);
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.borrow().len()
    }

    pub fn add_event_listener(&self, event_type: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId(next_id());
        self.shared
            .listeners
            .borrow_mut()
            .push((event_type.to_string(), id, listener));
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(_, existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Dispatch a named page event; returns how many listeners ran.
    pub fn dispatch_event(&self, event_type: &str) -> usize {
        let listeners: Vec<EventListener> = self
            .shared
            .listeners
            .borrow()
            .iter()
            .filter(|(kind, _, _)| kind == event_type)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();
        for listener in &listeners {
            listener();
        }
        listeners.len()
    }

    pub fn dispatch_input(&self, kind: InputKind) -> usize {
        self.dispatch_event(kind.as_str())
    }
}

impl MutationSource for Document {
    fn observe(&self, options: ObserveOptions, callback: MutationCallback) -> ObserverId {
        let id = ObserverId(next_id());
        self.shared.observers.borrow_mut().push(ObserverSlot {
            id,
            options,
            callback,
            pending: Vec::new(),
        });
        id
    }

    /// Stop observing; records not yet delivered are dropped.
    fn disconnect(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|observer| observer.id != id);
        observers.len() != before
    }
}

impl InputSource for Document {
    fn add_input_listener(&self, kind: InputKind, listener: EventListener) -> ListenerId {
        self.add_event_listener(kind.as_str(), listener)
    }
}
