use std::fmt;

use tokio::sync::mpsc;

/// Identifies one registered subscriber endpoint.
///
/// Ids are handed out by the control loop in subscription order and are never
/// reused, so an evicted endpoint can never be confused with a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Result of dropping the broadcaster's side of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closure {
    /// The receiver was still open; dropping our sender closes it.
    Closed,
    /// The subscriber had already closed or dropped its receiver.
    AlreadyClosed,
}

pub(crate) struct Subscriber<T> {
    pub id: SubscriberId,
    pub tx: mpsc::Sender<T>,
}

impl<T> Subscriber<T> {
    /// Drop the send side. Never fails: an endpoint the subscriber already
    /// closed just reports `AlreadyClosed`.
    ///
    /// If the subscriber kept its own clone of the sender, the receiver stays
    /// open until that clone is dropped too.
    pub fn close(self) -> Closure {
        if self.tx.is_closed() {
            Closure::AlreadyClosed
        } else {
            Closure::Closed
        }
    }
}

/// Ordered set of endpoints, owned by the control loop.
pub(crate) struct Registry<T> {
    next_id: u64,
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Append an endpoint at the tail and return its id.
    pub fn insert(&mut self, tx: mpsc::Sender<T>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, tx });
        id
    }

    /// Remove by identity, keeping the relative order of the rest.
    pub fn remove(&mut self, id: SubscriberId) -> Option<Subscriber<T>> {
        let pos = self.subscribers.iter().position(|s| s.id == id)?;
        Some(self.subscribers.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscriber<T>> {
        self.subscribers.iter()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Take every endpoint out, in subscription order.
    pub fn drain(&mut self) -> impl Iterator<Item = Subscriber<T>> + '_ {
        self.subscribers.drain(..)
    }
}
