use super::Resolve;
use crate::gate::{Admission, Gate};
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

/// Fewest entries the table holds before it starts sweeping dead receivers.
const MIN_SWEEP: usize = 16;

/// One gate per method receiver.
///
/// Receivers are told apart by the address of their `Arc` allocation. The
/// table only holds a `Weak` to each receiver, so a receiver is dropped as
/// soon as its last `Arc` is. Entries for dropped receivers are swept once
/// the table doubles in size, which keeps the cost amortized.
#[derive(Clone)]
pub struct PerReceiver {
    capacity: usize,
    table: Arc<ReceiverTable<Arc<Gate>>>,
}

impl PerReceiver {
    /// Gives each receiver its own gate of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        PerReceiver {
            capacity,
            table: Arc::new(ReceiverTable::new()),
        }
    }

    /// Returns the gate of `receiver`, if it has one yet.
    pub fn gate<R>(&self, receiver: &Arc<R>) -> Option<Arc<Gate>>
    where
        R: Send + Sync + 'static,
    {
        self.table.get(receiver)
    }

    /// Returns the number of receivers with a gate, counting dropped
    /// receivers that have not been swept yet.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no receiver has a gate.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R, Args> Resolve<Arc<R>, Args> for PerReceiver
where
    R: Send + Sync + 'static,
{
    type Key = ();

    fn key(&self, _: &Arc<R>, _: &Args) -> Self::Key {}

    fn admit(
        &self,
        receiver: &Arc<R>,
        _: Self::Key,
        admit: impl FnOnce(&Arc<Gate>) -> Admission,
    ) -> Admission {
        let capacity = self.capacity;
        let gate = self
            .table
            .get_or_insert_with(receiver, || Gate::new(capacity));
        admit(&gate)
    }
}

impl fmt::Debug for PerReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerReceiver")
            .field("capacity", &self.capacity)
            .field("receivers", &self.len())
            .finish()
    }
}

/// Weakly keyed map from receiver identity to `V`.
pub(crate) struct ReceiverTable<V> {
    inner: Mutex<Entries<V>>,
}

struct Entries<V> {
    map: HashMap<usize, Entry<V>>,
    sweep_at: usize,
}

struct Entry<V> {
    receiver: Weak<dyn Any + Send + Sync>,
    value: V,
}

impl<V: Clone> ReceiverTable<V> {
    pub(crate) fn new() -> Self {
        ReceiverTable {
            inner: Mutex::new(Entries {
                map: HashMap::new(),
                sweep_at: MIN_SWEEP,
            }),
        }
    }

    pub(crate) fn get<R>(&self, receiver: &Arc<R>) -> Option<V>
    where
        R: Send + Sync + 'static,
    {
        let entries = self.lock();
        entries
            .map
            .get(&identity(receiver))
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn get_or_insert_with<R>(&self, receiver: &Arc<R>, make: impl FnOnce() -> V) -> V
    where
        R: Send + Sync + 'static,
    {
        let mut entries = self.lock();
        let id = identity(receiver);
        if let Some(entry) = entries.map.get(&id) {
            return entry.value.clone();
        }

        if entries.map.len() >= entries.sweep_at {
            entries.sweep();
        }

        let weak = Arc::downgrade(receiver);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let value = make();
        entries.map.insert(
            id,
            Entry {
                receiver: weak,
                value: value.clone(),
            },
        );
        tracing::trace!(receivers = entries.map.len(), "receiver registered");
        value
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().map.len()
    }

    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Entries<V> {
    fn sweep(&mut self) {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.receiver.strong_count() > 0);
        self.sweep_at = std::cmp::max(self.map.len() * 2, MIN_SWEEP);
        tracing::trace!(
            swept = before - self.map.len(),
            receivers = self.map.len(),
            "swept dropped receivers"
        );
    }
}

/// The held `Weak` keeps the allocation, and so the address, from being
/// reused while the entry exists.
fn identity<R>(receiver: &Arc<R>) -> usize {
    Arc::as_ptr(receiver) as *const () as usize
}
