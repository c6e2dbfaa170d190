//! The admission, queueing and release state machine behind every limit.

mod permit;
mod record;
mod task;

pub use self::permit::Permit;
pub(crate) use self::record::{Deferred, Record, Rx, Start};

use crate::{queue::Queue, Flag};
use std::{
    cell::RefCell,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Called with a gate that just went idle, so its owner can drop it.
pub(crate) type Evict = Box<dyn Fn(&Gate) + Send + Sync>;

thread_local! {
    // Gates released while this thread was already releasing, `None` when it
    // isn't.
    static RELEASING: RefCell<Option<Vec<Arc<Gate>>>> = RefCell::new(None);
}

/// Lets at most `capacity` calls run at once and queues the rest.
///
/// A gate is shared through an `Arc`. Every wrapper holding the same gate
/// contends for the same slots, whatever callable it wraps.
///
/// ```
/// use tower_gate::{Gate, Limited};
/// use std::future::ready;
///
/// let gate = Gate::new(2);
/// let read = Limited::with_gate(gate.clone(), |path: &'static str| {
///     ready(Ok::<_, std::io::Error>(path.len()))
/// });
/// let write = Limited::with_gate(gate, |bytes: Vec<u8>| {
///     ready(Ok::<_, std::io::Error>(bytes.len()))
/// });
/// # drop((read, write));
/// ```
pub struct Gate {
    capacity: usize,
    state: Mutex<State>,
    evict: Option<Evict>,
}

struct State {
    available: usize,
    pending: Queue<Deferred>,
}

/// What the gate decided to do with a call.
pub enum Admission {
    /// Start the call now. Bypassing calls carry no permit.
    Run(Deferred, Option<Permit>),
    /// The call waits in the gate's queue.
    Queued,
    /// The call asked to fail rather than queue, and the gate is full.
    Full,
}

impl Gate {
    /// Creates a gate with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. An unbounded limit is expressed by not
    /// having a gate at all, see [`Limit::unbounded`].
    ///
    /// [`Limit::unbounded`]: crate::Limit::unbounded
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self::with_evict(capacity, None))
    }

    pub(crate) fn with_evict(capacity: usize, evict: Option<Evict>) -> Self {
        assert!(capacity > 0, "a gate needs at least one slot");
        Gate {
            capacity,
            state: Mutex::new(State {
                available: capacity,
                pending: Queue::new(),
            }),
            evict,
        }
    }

    /// Returns the number of slots this gate was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Returns the number of calls waiting for a slot.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns `true` if no call holds a slot and none is waiting.
    pub fn is_idle(&self) -> bool {
        self.lock().is_idle(self.capacity)
    }

    /// Decides, under the gate lock, whether `call` runs now, waits, or is
    /// refused. The call is never started while the lock is held.
    pub(crate) fn admit(self: &Arc<Self>, flag: Option<Flag>, call: Deferred) -> Admission {
        if flag == Some(Flag::Bypass) {
            tracing::trace!("bypassing gate");
            return Admission::Run(call, None);
        }

        let mut state = self.lock();
        if state.try_admit() {
            drop(state);
            tracing::trace!("call admitted");
            return Admission::Run(call, Some(Permit::new(self.clone())));
        }

        if flag == Some(Flag::FailOnFull) {
            tracing::debug!(capacity = self.capacity, "gate full; refusing call");
            return Admission::Full;
        }

        state.enqueue(call);
        tracing::trace!(pending = state.pending.len(), "gate full; call queued");
        Admission::Queued
    }

    /// Hands a freed slot to the oldest queued call, or returns it to the
    /// pool if nothing is waiting.
    ///
    /// A runtime that is shutting down drops the handed-on call on the spot,
    /// releasing again. Such nested releases are run in a loop by the
    /// outermost one, so a long queue never deepens the stack.
    pub(crate) fn release(self: &Arc<Self>) {
        let nested = RELEASING.try_with(|releasing| {
            let mut releasing = releasing.borrow_mut();
            match *releasing {
                Some(ref mut queued) => {
                    queued.push(self.clone());
                    true
                }
                None => {
                    *releasing = Some(Vec::new());
                    false
                }
            }
        });
        match nested {
            Ok(true) => return,
            Ok(false) => {}
            // Thread-local storage is being torn down.
            Err(_) => return self.release_one(),
        }

        let _draining = Draining;
        let mut next = Some(self.clone());
        while let Some(gate) = next {
            gate.release_one();
            next = RELEASING
                .try_with(|releasing| releasing.borrow_mut().as_mut().and_then(Vec::pop))
                .ok()
                .flatten();
        }
    }

    fn release_one(self: &Arc<Self>) {
        let mut state = self.lock();
        match state.pending.pop() {
            Some(next) => {
                drop(state);
                tracing::trace!("slot handed to queued call");
                // The slot moves to `next` without passing through `available`.
                next.resume(Permit::new(self.clone()));
            }
            None => {
                state.available += 1;
                debug_assert!(state.available <= self.capacity);
                let idle = state.is_idle(self.capacity);
                drop(state);
                tracing::trace!("slot returned");

                if idle {
                    if let Some(evict) = &self.evict {
                        evict(self);
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No user code runs under this lock, so a poisoned state is still
        // consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn try_admit(&mut self) -> bool {
        if self.available > 0 {
            self.available -= 1;
            true
        } else {
            false
        }
    }

    fn enqueue(&mut self, call: Deferred) {
        self.pending.push(call);
    }

    fn is_idle(&self, capacity: usize) -> bool {
        self.available == capacity && self.pending.is_empty()
    }
}

/// Ends a release loop, even one cut short by a panic.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = RELEASING.try_with(|releasing| releasing.borrow_mut().take());
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Gate")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Run(_, permit) => f
                .debug_tuple("Admission::Run")
                .field(&permit.is_some())
                .finish(),
            Admission::Queued => f.write_str("Admission::Queued"),
            Admission::Full => f.write_str("Admission::Full"),
        }
    }
}
