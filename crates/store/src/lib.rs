//! mapvis store: observable collections and the models they hold.
//!
//! Collections keep an `ArcSwap` snapshot for lock-free readers and notify
//! subscribers synchronously, in mutation order, after each change.

#![forbid(unsafe_code)]

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

pub mod models;

pub use models::{AnalysisNode, DataviewModel, LayerMeta, LayerModel};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

/// Typed publish/subscribe channel with synchronous delivery.
pub struct Emitter<E> {
    inner: Arc<Mutex<Listeners<E>>>,
}

impl<E: 'static> Emitter<E> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Listeners { next_id: 0, entries: Vec::new() })) }
    }

    /// Register `listener`; it stays bound until the returned subscription is
    /// unbound or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut guard = self.inner.lock();
            let id = guard.next_id;
            guard.next_id += 1;
            guard.entries.push((id, Arc::new(listener)));
            id
        };
        let weak: Weak<Mutex<Listeners<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().entries.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    /// Deliver `event` to every bound listener. Listeners run outside the lock,
    /// so they may subscribe or unbind while handling the event.
    pub fn emit(&self, event: &E) {
        let listeners: SmallVec<[Listener<E>; 4]> = self.inner.lock().entries.iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize { self.inner.lock().entries.len() }
}

impl<E: 'static> Default for Emitter<E> {
    fn default() -> Self { Self::new() }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("listeners", &self.inner.lock().entries.len()).finish()
    }
}

/// Binding of one listener to an [`Emitter`]. Unbinds on drop.
#[must_use = "dropping a Subscription unbinds the listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Unbind now; equivalent to dropping the subscription.
    pub fn unbind(mut self) { self.detach_now(); }

    pub fn is_bound(&self) -> bool { self.detach.is_some() }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.detach_now(); }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("bound", &self.is_bound()).finish()
    }
}

/// Items addressable by a stable id.
pub trait Keyed {
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> &Self::Id;
}

/// Change notification of a [`Collection`].
#[derive(Debug)]
pub enum CollectionEvent<T> {
    Added(Arc<T>),
    Removed(Arc<T>),
    /// Contents replaced wholesale.
    Reset,
}

/// Ordered collection of shared models, unique by id.
pub struct Collection<T: Keyed> {
    name: &'static str,
    items: ArcSwap<Vec<Arc<T>>>,
    write: Mutex<()>,
    epoch: AtomicU64,
    events: Emitter<CollectionEvent<T>>,
}

impl<T> Collection<T>
where
    T: Keyed + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self { name, items: ArcSwap::from_pointee(Vec::new()), write: Mutex::new(()), epoch: AtomicU64::new(0), events: Emitter::new() }
    }

    pub fn name(&self) -> &'static str { self.name }

    /// Current contents; later mutations do not affect the returned snapshot.
    pub fn current(&self) -> Arc<Vec<Arc<T>>> { self.items.load_full() }

    pub fn len(&self) -> usize { self.items.load().len() }

    pub fn is_empty(&self) -> bool { self.items.load().is_empty() }

    /// Number of mutations applied so far.
    pub fn epoch(&self) -> u64 { self.epoch.load(Ordering::Acquire) }

    pub fn get(&self, id: &T::Id) -> Option<Arc<T>> {
        self.items.load().iter().find(|item| item.key() == id).cloned()
    }

    pub fn at(&self, index: usize) -> Option<Arc<T>> { self.items.load().get(index).cloned() }

    pub fn contains(&self, id: &T::Id) -> bool { self.items.load().iter().any(|item| item.key() == id) }

    pub fn any<P>(&self, predicate: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.items.load().iter().any(|item| predicate(&**item))
    }

    /// Append `item`. Returns false (and notifies nobody) if its id is taken.
    pub fn add(&self, item: Arc<T>) -> bool {
        {
            let _w = self.write.lock();
            let cur = self.items.load_full();
            if cur.iter().any(|x| x.key() == item.key()) {
                debug!(collection = self.name, id = ?item.key(), "store: duplicate add ignored");
                return false;
            }
            let mut next = Vec::with_capacity(cur.len() + 1);
            next.extend(cur.iter().cloned());
            next.push(Arc::clone(&item));
            self.commit(next);
        }
        self.events.emit(&CollectionEvent::Added(item));
        true
    }

    pub fn remove(&self, id: &T::Id) -> Option<Arc<T>> {
        let removed = {
            let _w = self.write.lock();
            let cur = self.items.load_full();
            let idx = cur.iter().position(|x| x.key() == id)?;
            let mut next: Vec<Arc<T>> = (*cur).clone();
            let removed = next.remove(idx);
            self.commit(next);
            removed
        };
        self.events.emit(&CollectionEvent::Removed(Arc::clone(&removed)));
        Some(removed)
    }

    /// Replace all contents. Later duplicates of an id are dropped.
    pub fn reset(&self, items: Vec<Arc<T>>) {
        {
            let _w = self.write.lock();
            let mut seen: FxHashSet<T::Id> = FxHashSet::default();
            let next: Vec<Arc<T>> = items.into_iter().filter(|item| seen.insert(item.key().clone())).collect();
            self.commit(next);
        }
        self.events.emit(&CollectionEvent::Reset);
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CollectionEvent<T>) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize { self.events.listener_count() }

    fn commit(&self, next: Vec<Arc<T>>) {
        self.items.store(Arc::new(next));
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

impl<T: Keyed> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("len", &self.items.load().len())
            .field("epoch", &self.epoch.load(Ordering::Acquire))
            .finish()
    }
}

pub type LayersCollection = Collection<LayerModel>;
pub type DataviewsCollection = Collection<DataviewModel>;
pub type AnalysesCollection = Collection<AnalysisNode>;
