use crate::{LazyValue, ObjectInfo, Value};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
};

/// The channels an object can emit on. Stores and references subscribe to
/// these to notice dirty columns, flush boundaries and lazy reads.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    /// A column value changed, including installation of a lazy marker.
    Changed,
    /// The object is about to be written out.
    Flush,
    /// The object was written out.
    Flushed,
    /// The object was added to a store.
    Added,
    /// The object was removed from a store.
    Removed,
    /// A read hit a lazy marker and needs the store to materialize it.
    ResolveLazy,
}

#[derive(Clone, Debug)]
pub enum Event {
    Changed {
        column: usize,
        old_value: Option<Value>,
        new_value: Option<Value>,
        /// Set when the new state is a lazy marker instead of a value.
        lazy: Option<LazyValue>,
        from_db: bool,
    },
    Flush,
    Flushed,
    Added,
    Removed,
    ResolveLazy { column: usize, lazy: LazyValue },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Changed { .. } => EventKind::Changed,
            Event::Flush => EventKind::Flush,
            Event::Flushed => EventKind::Flushed,
            Event::Added => EventKind::Added,
            Event::Removed => EventKind::Removed,
            Event::ResolveLazy { .. } => EventKind::ResolveLazy,
        }
    }
}

/// A hook returning `false` is dropped from its channel after the call.
pub type Hook = Rc<dyn Fn(&Rc<ObjectInfo>, &Event) -> bool>;

/// Hook identifier, used to unhook without comparing closures.
pub type HookId = u64;

/// Per-object publish/subscribe. Hooks receive the owning object so that
/// subscribers don't have to capture it (and create cycles) themselves.
pub struct EventSystem {
    owner: RefCell<Weak<ObjectInfo>>,
    hooks: RefCell<HashMap<EventKind, Vec<(HookId, Hook)>>>,
    saved: RefCell<Option<HashMap<EventKind, Vec<(HookId, Hook)>>>>,
    next_id: Cell<HookId>,
}

impl EventSystem {
    pub fn new() -> Self {
        Self {
            owner: RefCell::new(Weak::new()),
            hooks: RefCell::new(HashMap::new()),
            saved: RefCell::new(None),
            next_id: Cell::new(1),
        }
    }

    /// Bind to the object this system belongs to. Done once right after
    /// the object is allocated.
    pub(crate) fn bind(&self, owner: &Rc<ObjectInfo>) {
        *self.owner.borrow_mut() = Rc::downgrade(owner);
    }

    pub fn hook(&self, kind: EventKind, hook: Hook) -> HookId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.hooks.borrow_mut().entry(kind).or_default().push((id, hook));
        id
    }

    pub fn unhook(&self, kind: EventKind, id: HookId) {
        if let Some(hooks) = self.hooks.borrow_mut().get_mut(&kind) {
            hooks.retain(|(i, _)| *i != id);
        }
    }

    /// Calls every hook on the event's channel. No borrow is held while a
    /// hook runs, so hooks may freely hook, unhook and emit.
    pub fn emit(&self, event: Event) {
        let Some(owner) = self.owner.borrow().upgrade() else {
            return;
        };
        let kind = event.kind();
        let snapshot = match self.hooks.borrow().get(&kind) {
            Some(hooks) => hooks.clone(),
            None => return,
        };
        let mut dropped = Vec::new();
        for (id, hook) in &snapshot {
            if !hook(&owner, &event) {
                dropped.push(*id);
            }
        }
        if !dropped.is_empty() {
            if let Some(hooks) = self.hooks.borrow_mut().get_mut(&kind) {
                hooks.retain(|(i, _)| !dropped.contains(i));
            }
        }
    }

    /// Snapshot the current subscriptions, for transaction boundaries.
    pub fn save(&self) {
        *self.saved.borrow_mut() = Some(self.hooks.borrow().clone());
    }

    /// Go back to the last snapshot. The snapshot stays in place so that
    /// repeated restores (rollback after rollback) are possible.
    pub fn restore(&self) {
        if let Some(saved) = self.saved.borrow().as_ref() {
            *self.hooks.borrow_mut() = saved.clone();
        }
    }
}

impl Default for EventSystem {
    fn default() -> Self {
        Self::new()
    }
}
