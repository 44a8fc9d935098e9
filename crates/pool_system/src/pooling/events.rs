//! Pool lifecycle events
//!
//! Pools publish what happens to their instances so other systems can keep
//! their own bookkeeping current:
//! - Observers are plain closures registered per pool
//! - Delivery is immediate and in registration order
//! - An observer stays registered until it is unsubscribed

use crate::host::ObjectHandle;

/// What happened to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolEventKind {
    /// A new instance was created from the template
    Instantiated,
    /// An instance left the pool
    Spawned,
    /// An instance came back to the pool
    Despawned,
    /// The pool destroyed an instance
    Destroyed,
    /// A free instance was found destroyed by someone else and dropped
    Expired,
}

/// Event published by a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEvent {
    /// Type of event
    pub kind: PoolEventKind,
    /// Template of the publishing pool
    pub template: ObjectHandle,
    /// Affected instance
    pub instance: ObjectHandle,
}

/// Observer registration token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer callback
pub type Observer = Box<dyn FnMut(&PoolEvent) + Send>;

/// Registered observers of one pool
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Observer)>,
}

impl Observers {
    /// Register an observer
    pub fn subscribe(&mut self, observer: Observer) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    /// Remove an observer; false if it was not registered
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Deliver an event to every observer
    pub fn publish(&mut self, event: &PoolEvent) {
        for (_, observer) in &mut self.entries {
            observer(event);
        }
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("count", &self.entries.len()).finish()
    }
}
