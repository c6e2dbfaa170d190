use super::{receiver::ReceiverTable, Resolve};
use crate::gate::{Admission, Gate};
use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

/// One gate per key, derived from each call's arguments by `P`.
///
/// `P` is a `Fn(&Args) -> K`.
pub struct Keyed<P, K> {
    partition: Arc<P>,
    table: Arc<KeyTable<K>>,
}

/// One gate per key within each receiver, the key derived from the receiver
/// and the call's arguments by `P`.
///
/// `P` is a `Fn(&R, &Args) -> K`.
pub struct PerReceiverKeyed<P, K> {
    partition: Arc<P>,
    capacity: usize,
    tables: Arc<ReceiverTable<Arc<KeyTable<K>>>>,
}

impl<P, K> Keyed<P, K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Partitions calls by `partition`, each key getting `capacity` slots.
    pub fn new(capacity: usize, partition: P) -> Self {
        Keyed::with_partition(capacity, Arc::new(partition))
    }

    pub(crate) fn with_partition(capacity: usize, partition: Arc<P>) -> Self {
        Keyed {
            partition,
            table: KeyTable::new(capacity),
        }
    }

    /// Returns the gate of `key`, if it has one right now.
    pub fn gate(&self, key: &K) -> Option<Arc<Gate>> {
        self.table.get(key)
    }

    /// Returns the number of keys that currently have a gate.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no key currently has a gate.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P, K> PerReceiverKeyed<P, K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Partitions each receiver's calls by `partition`, each key getting
    /// `capacity` slots.
    pub fn new(capacity: usize, partition: P) -> Self {
        PerReceiverKeyed::with_partition(capacity, Arc::new(partition))
    }

    pub(crate) fn with_partition(capacity: usize, partition: Arc<P>) -> Self {
        PerReceiverKeyed {
            partition,
            capacity,
            tables: Arc::new(ReceiverTable::new()),
        }
    }

    /// Returns the gate of `key` on `receiver`, if it has one right now.
    pub fn gate<R>(&self, receiver: &Arc<R>, key: &K) -> Option<Arc<Gate>>
    where
        R: Send + Sync + 'static,
    {
        self.tables.get(receiver).and_then(|table| table.get(key))
    }

    /// Returns the number of keys of `receiver` that currently have a gate.
    pub fn len<R>(&self, receiver: &Arc<R>) -> usize
    where
        R: Send + Sync + 'static,
    {
        self.tables.get(receiver).map_or(0, |table| table.len())
    }
}

impl<P, K, Args> Resolve<(), Args> for Keyed<P, K>
where
    P: Fn(&Args) -> K,
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    type Key = K;

    fn key(&self, _: &(), args: &Args) -> K {
        (self.partition)(args)
    }

    fn admit(&self, _: &(), key: K, admit: impl FnOnce(&Arc<Gate>) -> Admission) -> Admission {
        self.table.admit(key, admit)
    }
}

impl<P, K, R, Args> Resolve<Arc<R>, Args> for PerReceiverKeyed<P, K>
where
    P: Fn(&R, &Args) -> K,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    type Key = K;

    fn key(&self, receiver: &Arc<R>, args: &Args) -> K {
        (self.partition)(&**receiver, args)
    }

    fn admit(
        &self,
        receiver: &Arc<R>,
        key: K,
        admit: impl FnOnce(&Arc<Gate>) -> Admission,
    ) -> Admission {
        let capacity = self.capacity;
        let table = self
            .tables
            .get_or_insert_with(receiver, || KeyTable::new(capacity));
        table.admit(key, admit)
    }
}

impl<P, K> Clone for Keyed<P, K> {
    fn clone(&self) -> Self {
        Keyed {
            partition: self.partition.clone(),
            table: self.table.clone(),
        }
    }
}

impl<P, K> Clone for PerReceiverKeyed<P, K> {
    fn clone(&self) -> Self {
        PerReceiverKeyed {
            partition: self.partition.clone(),
            capacity: self.capacity,
            tables: self.tables.clone(),
        }
    }
}

impl<P, K> fmt::Debug for Keyed<P, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyed")
            .field("capacity", &self.table.capacity)
            .finish()
    }
}

impl<P, K> fmt::Debug for PerReceiverKeyed<P, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerReceiverKeyed")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Lazily populated key → gate map that drops gates once they go idle.
///
/// Lock order is always table, then gate. Admission happens with the table
/// locked, so a gate can't be evicted between being looked up and taking a
/// call.
pub(crate) struct KeyTable<K> {
    capacity: usize,
    gates: Mutex<HashMap<K, Arc<Gate>>>,
}

impl<K> KeyTable<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(KeyTable {
            capacity,
            gates: Mutex::new(HashMap::new()),
        })
    }

    fn admit(self: &Arc<Self>, key: K, admit: impl FnOnce(&Arc<Gate>) -> Admission) -> Admission {
        let mut gates = self.lock();
        let gate = gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Gate::with_evict(self.capacity, Some(self.evictor(&key)))))
            .clone();

        let admission = admit(&gate);

        // A bypassing call on a fresh gate leaves it idle, and nothing would
        // ever release it.
        if gate.is_idle() {
            gates.remove(&key);
        }
        admission
    }

    fn evictor(self: &Arc<Self>, key: &K) -> crate::gate::Evict {
        let table: Weak<Self> = Arc::downgrade(self);
        let key = key.clone();
        Box::new(move |gate: &Gate| {
            if let Some(table) = table.upgrade() {
                table.evict(&key, gate);
            }
        })
    }

    fn evict(&self, key: &K, gate: &Gate) {
        let mut gates = self.lock();
        let current = match gates.get(key) {
            Some(current) => current,
            None => return,
        };
        // The gate may have taken a new call, or been replaced, since it
        // reported itself idle.
        if std::ptr::eq(Arc::as_ptr(current), gate) && gate.is_idle() {
            gates.remove(key);
            tracing::trace!(keys = gates.len(), "idle gate removed");
        }
    }

    fn get(&self, key: &K) -> Option<Arc<Gate>> {
        self.lock().get(key).cloned()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Arc<Gate>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
