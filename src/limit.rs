//! Limit configuration, attachable to functions or to methods.

use crate::{
    error::MixedAttachment,
    gate::Gate,
    resolve::{Keyed, PerReceiver, PerReceiverKeyed, Shared},
    termination::{Settle, Termination},
    wrap::{Limited, LimitedMethod},
};
use std::{
    fmt,
    hash::Hash,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// A concurrency limit that can be attached to any number of functions, or
/// to any number of methods, but not to both.
///
/// Every function attached to the same `Limit` shares one gate. Every method
/// attached to the same `Limit` shares one gate per receiver. The first
/// attachment decides which of the two the limit is for; attaching it the
/// other way afterwards fails with [`MixedAttachment`].
///
/// ```
/// use std::future::ready;
/// use tower_gate::Limit;
///
/// let limit = Limit::new(2);
/// let lookup = limit
///     .function(|name: String| ready(Ok::<_, std::io::Error>(name.len())))
///     .unwrap();
/// let store = limit
///     .function(|(name, _value): (String, u64)| ready(Ok::<_, std::io::Error>(name)))
///     .unwrap();
///
/// // `lookup` and `store` contend for the same two slots, so the limit can't
/// // also be used for methods.
/// assert!(limit
///     .method(|_this: std::sync::Arc<()>, _: ()| ready(Ok::<_, std::io::Error>(())))
///     .is_err());
/// # drop((lookup, store));
/// ```
#[derive(Clone)]
pub struct Limit {
    capacity: usize,
    termination: Arc<dyn Termination>,
    attached: Arc<Mutex<Option<Attached<Option<Shared>, Option<PerReceiver>>>>>,
}

/// A [`Limit`] partitioned by a key derived from each call.
///
/// Created by [`Limit::partition_by`]. Calls with different keys never
/// contend; calls with the same key share that key's gate, which only lives
/// while it has calls running or waiting.
pub struct KeyedLimit<K, P> {
    capacity: usize,
    termination: Arc<dyn Termination>,
    partition: Arc<P>,
    attached: Arc<Mutex<Option<Attached<Option<Keyed<P, K>>, Option<PerReceiverKeyed<P, K>>>>>>,
    _key: PhantomData<fn() -> K>,
}

/// Which way a limit was first attached, and the state that goes with it.
enum Attached<F, M> {
    Function(F),
    Method(M),
}

impl Limit {
    /// Creates a limit of `capacity` concurrent calls. A capacity of zero
    /// means no limit at all.
    pub fn new(capacity: usize) -> Self {
        Limit {
            capacity,
            termination: Arc::new(Settle::new()),
            attached: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a limit that never queues nor refuses a call.
    pub fn unbounded() -> Self {
        Limit::new(0)
    }

    /// Returns the configured capacity, zero meaning unbounded.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sets the policy deciding when a call gives its slot back. Defaults to
    /// [`Settle`], releasing the slot as soon as the call settles.
    pub fn termination<T>(mut self, policy: T) -> Self
    where
        T: Termination,
    {
        self.termination = Arc::new(policy);
        self
    }

    /// Partitions the limit: calls get one gate per key `partition` derives
    /// from them.
    ///
    /// When attached to a function, `partition` is a `Fn(&Args) -> K`. When
    /// attached to a method on `R`, it is a `Fn(&R, &Args) -> K` and keys are
    /// local to each receiver.
    pub fn partition_by<K, P>(self, partition: P) -> KeyedLimit<K, P> {
        KeyedLimit {
            capacity: self.capacity,
            termination: self.termination,
            partition: Arc::new(partition),
            attached: Arc::new(Mutex::new(None)),
            _key: PhantomData,
        }
    }

    /// Attaches the limit to a function.
    pub fn function<F>(&self, f: F) -> Result<Limited<F, Shared>, MixedAttachment> {
        let mut attached = lock(&self.attached);
        let resolver = match *attached {
            Some(Attached::Function(ref resolver)) => resolver.clone(),
            Some(Attached::Method(_)) => return Err(MixedAttachment::new()),
            None => {
                let resolver = self.gate().map(Shared::new);
                *attached = Some(Attached::Function(resolver.clone()));
                tracing::trace!(capacity = self.capacity, "limit attached to functions");
                resolver
            }
        };
        Ok(Limited::from_parts(f, resolver, self.termination.clone()))
    }

    /// Attaches the limit to a method.
    pub fn method<F>(&self, f: F) -> Result<LimitedMethod<F, PerReceiver>, MixedAttachment> {
        let mut attached = lock(&self.attached);
        let resolver = match *attached {
            Some(Attached::Method(ref resolver)) => resolver.clone(),
            Some(Attached::Function(_)) => return Err(MixedAttachment::new()),
            None => {
                let resolver = self.bounded().map(PerReceiver::new);
                *attached = Some(Attached::Method(resolver.clone()));
                tracing::trace!(capacity = self.capacity, "limit attached to methods");
                resolver
            }
        };
        Ok(LimitedMethod::from_parts(f, resolver, self.termination.clone()))
    }

    fn bounded(&self) -> Option<usize> {
        Some(self.capacity).filter(|&capacity| capacity > 0)
    }

    fn gate(&self) -> Option<Arc<Gate>> {
        self.bounded().map(Gate::new)
    }
}

impl<K, P> KeyedLimit<K, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    /// Sets the policy deciding when a call gives its slot back.
    pub fn termination<T>(mut self, policy: T) -> Self
    where
        T: Termination,
    {
        self.termination = Arc::new(policy);
        self
    }

    /// Attaches the limit to a function; `P` must be a `Fn(&Args) -> K`.
    pub fn function<F>(&self, f: F) -> Result<Limited<F, Keyed<P, K>>, MixedAttachment> {
        let mut attached = lock(&self.attached);
        let resolver = match *attached {
            Some(Attached::Function(ref resolver)) => resolver.clone(),
            Some(Attached::Method(_)) => return Err(MixedAttachment::new()),
            None => {
                let resolver = Some(self.capacity)
                    .filter(|&capacity| capacity > 0)
                    .map(|capacity| Keyed::with_partition(capacity, self.partition.clone()));
                *attached = Some(Attached::Function(resolver.clone()));
                tracing::trace!(capacity = self.capacity, "keyed limit attached to functions");
                resolver
            }
        };
        Ok(Limited::from_parts(f, resolver, self.termination.clone()))
    }

    /// Attaches the limit to a method; `P` must be a `Fn(&R, &Args) -> K`.
    pub fn method<F>(
        &self,
        f: F,
    ) -> Result<LimitedMethod<F, PerReceiverKeyed<P, K>>, MixedAttachment> {
        let mut attached = lock(&self.attached);
        let resolver = match *attached {
            Some(Attached::Method(ref resolver)) => resolver.clone(),
            Some(Attached::Function(_)) => return Err(MixedAttachment::new()),
            None => {
                let resolver = Some(self.capacity)
                    .filter(|&capacity| capacity > 0)
                    .map(|capacity| {
                        PerReceiverKeyed::with_partition(capacity, self.partition.clone())
                    });
                *attached = Some(Attached::Method(resolver.clone()));
                tracing::trace!(capacity = self.capacity, "keyed limit attached to methods");
                resolver
            }
        };
        Ok(LimitedMethod::from_parts(f, resolver, self.termination.clone()))
    }
}

impl<K, P> Clone for KeyedLimit<K, P> {
    fn clone(&self) -> Self {
        KeyedLimit {
            capacity: self.capacity,
            termination: self.termination.clone(),
            partition: self.partition.clone(),
            attached: self.attached.clone(),
            _key: PhantomData,
        }
    }
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<K, P> fmt::Debug for KeyedLimit<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLimit")
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
