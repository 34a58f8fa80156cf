use crate::entry::EntrySnapshot;
use crate::task::dispatcher::{AsyncEventDispatcher, QueuedEvent};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// The kinds of entry events a cache reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  /// A value was stored for an absent key.
  Created,
  /// The value of a present key was replaced.
  Updated,
  /// An entry was removed explicitly.
  Removed,
  /// An entry was removed because it was no longer fresh.
  Expired,
  /// An entry was removed because its segment exceeded a bound.
  Evicted,
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventKind::Created => write!(f, "created"),
      EventKind::Updated => write!(f, "updated"),
      EventKind::Removed => write!(f, "removed"),
      EventKind::Expired => write!(f, "expired"),
      EventKind::Evicted => write!(f, "evicted"),
    }
  }
}

/// Handles an event about one entry.
pub type EntryHandler<K, V> = Arc<dyn Fn(&EntrySnapshot<K, V>) + Send + Sync>;

/// Handles an update, receiving the previous and the new entry.
pub type UpdateHandler<K, V> = Arc<dyn Fn(&EntrySnapshot<K, V>, &EntrySnapshot<K, V>) + Send + Sync>;

/// A listener stated as a set of optional handlers, one per event kind.
///
/// ```
/// use fibre_segcache::EntryListener;
///
/// let listener = EntryListener::<u32, String>::new()
///   .on_created(|e| println!("created {}", e.key()))
///   .on_removed(|e| println!("removed {}", e.key()));
/// assert_eq!(listener.kinds().len(), 2);
/// ```
pub struct EntryListener<K, V> {
  created: Option<EntryHandler<K, V>>,
  updated: Option<UpdateHandler<K, V>>,
  removed: Option<EntryHandler<K, V>>,
  expired: Option<EntryHandler<K, V>>,
  evicted: Option<EntryHandler<K, V>>,
}

impl<K, V> EntryListener<K, V> {
  pub fn new() -> Self {
    Self {
      created: None,
      updated: None,
      removed: None,
      expired: None,
      evicted: None,
    }
  }

  pub fn on_created(mut self, handler: impl Fn(&EntrySnapshot<K, V>) + Send + Sync + 'static) -> Self {
    self.created = Some(Arc::new(handler));
    self
  }

  pub fn on_updated(
    mut self,
    handler: impl Fn(&EntrySnapshot<K, V>, &EntrySnapshot<K, V>) + Send + Sync + 'static,
  ) -> Self {
    self.updated = Some(Arc::new(handler));
    self
  }

  pub fn on_removed(mut self, handler: impl Fn(&EntrySnapshot<K, V>) + Send + Sync + 'static) -> Self {
    self.removed = Some(Arc::new(handler));
    self
  }

  pub fn on_expired(mut self, handler: impl Fn(&EntrySnapshot<K, V>) + Send + Sync + 'static) -> Self {
    self.expired = Some(Arc::new(handler));
    self
  }

  pub fn on_evicted(mut self, handler: impl Fn(&EntrySnapshot<K, V>) + Send + Sync + 'static) -> Self {
    self.evicted = Some(Arc::new(handler));
    self
  }

  /// The event kinds this listener handles.
  pub fn kinds(&self) -> Vec<EventKind> {
    [
      (self.created.is_some(), EventKind::Created),
      (self.updated.is_some(), EventKind::Updated),
      (self.removed.is_some(), EventKind::Removed),
      (self.expired.is_some(), EventKind::Expired),
      (self.evicted.is_some(), EventKind::Evicted),
    ]
    .into_iter()
    .filter_map(|(present, kind)| present.then_some(kind))
    .collect()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.kinds().is_empty()
  }
}

impl<K, V> Default for EntryListener<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> Clone for EntryListener<K, V> {
  fn clone(&self) -> Self {
    Self {
      created: self.created.clone(),
      updated: self.updated.clone(),
      removed: self.removed.clone(),
      expired: self.expired.clone(),
      evicted: self.evicted.clone(),
    }
  }
}

impl<K, V> fmt::Debug for EntryListener<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntryListener")
      .field("kinds", &self.kinds())
      .finish()
  }
}

/// The listeners of one cache, partitioned by event kind.
///
/// Async listeners are appended as adapters that enqueue into the dispatcher,
/// so firing walks one sequence per kind in registration order.
pub(crate) struct ListenerSet<K, V> {
  created: Vec<EntryHandler<K, V>>,
  updated: Vec<UpdateHandler<K, V>>,
  removed: Vec<EntryHandler<K, V>>,
  expired: Vec<EntryHandler<K, V>>,
  evicted: Vec<EntryHandler<K, V>>,
}

impl<K, V> ListenerSet<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new() -> Self {
    Self {
      created: Vec::new(),
      updated: Vec::new(),
      removed: Vec::new(),
      expired: Vec::new(),
      evicted: Vec::new(),
    }
  }

  pub(crate) fn add_sync(&mut self, listener: EntryListener<K, V>) {
    self.created.extend(listener.created);
    self.updated.extend(listener.updated);
    self.removed.extend(listener.removed);
    self.expired.extend(listener.expired);
    self.evicted.extend(listener.evicted);
  }

  pub(crate) fn add_async(&mut self, listener: EntryListener<K, V>, dispatcher: &Arc<AsyncEventDispatcher<K>>) {
    self.created.extend(listener.created.map(|h| forward(h, dispatcher)));
    self.removed.extend(listener.removed.map(|h| forward(h, dispatcher)));
    self.expired.extend(listener.expired.map(|h| forward(h, dispatcher)));
    self.evicted.extend(listener.evicted.map(|h| forward(h, dispatcher)));
    if let Some(handler) = listener.updated {
      let dispatcher = Arc::clone(dispatcher);
      let adapter: UpdateHandler<K, V> = Arc::new(move |old: &EntrySnapshot<K, V>, new: &EntrySnapshot<K, V>| {
        let (handler, old, new) = (Arc::clone(&handler), old.clone(), new.clone());
        dispatcher.queue(QueuedEvent {
          // Keyed by the previous entry so the update orders after
          // earlier events of the same key.
          key: old.key().clone(),
          thunk: Box::new(move || handler(&old, &new)),
        });
      });
      self.updated.push(adapter);
    }
  }

  pub(crate) fn has(&self, kind: EventKind) -> bool {
    match kind {
      EventKind::Created => !self.created.is_empty(),
      EventKind::Updated => !self.updated.is_empty(),
      EventKind::Removed => !self.removed.is_empty(),
      EventKind::Expired => !self.expired.is_empty(),
      EventKind::Evicted => !self.evicted.is_empty(),
    }
  }

  pub(crate) fn fire_created(&self, entry: &EntrySnapshot<K, V>) {
    self.created.iter().for_each(|h| h(entry));
  }

  pub(crate) fn fire_updated(&self, old: &EntrySnapshot<K, V>, new: &EntrySnapshot<K, V>) {
    self.updated.iter().for_each(|h| h(old, new));
  }

  pub(crate) fn fire_removed(&self, entry: &EntrySnapshot<K, V>) {
    self.removed.iter().for_each(|h| h(entry));
  }

  pub(crate) fn fire_expired(&self, entry: &EntrySnapshot<K, V>) {
    self.expired.iter().for_each(|h| h(entry));
  }

  pub(crate) fn fire_evicted(&self, entry: &EntrySnapshot<K, V>) {
    self.evicted.iter().for_each(|h| h(entry));
  }
}

// Wraps a handler into an adapter that only enqueues.
fn forward<K, V>(handler: EntryHandler<K, V>, dispatcher: &Arc<AsyncEventDispatcher<K>>) -> EntryHandler<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  let dispatcher = Arc::clone(dispatcher);
  Arc::new(move |entry: &EntrySnapshot<K, V>| {
    let (handler, entry) = (Arc::clone(&handler), entry.clone());
    dispatcher.queue(QueuedEvent {
      key: entry.key().clone(),
      thunk: Box::new(move || handler(&entry)),
    });
  })
}
