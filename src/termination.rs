//! Policies deciding when an admitted call gives its slot back.
//!
//! By default a call holds its slot until its outcome settles. A
//! [`Termination`] policy can stretch that: it receives a [`Settled`] future
//! for the call and returns a [`Signal`], and the slot is only released once
//! the signal completes. This is how a call returning, say, a connection
//! handle can keep its slot until the handle is closed:
//!
//! ```
//! use std::future::ready;
//! use tokio::sync::watch;
//! use tower_gate::{termination::Settled, Limit};
//!
//! struct Connection {
//!     open: watch::Sender<()>,
//! }
//!
//! let limit = Limit::new(8).termination(|settled: Settled| {
//!     // Grab a way to observe the connection before the caller gets it.
//!     let closed = settled.inspect(|outcome| {
//!         outcome
//!             .ok()
//!             .and_then(|response| response.downcast_ref::<Connection>())
//!             .map(|connection| connection.open.subscribe())
//!     });
//!     async move {
//!         if let Some(Some(mut open)) = closed.await {
//!             // Resolves with an error once the `Connection` is dropped.
//!             while open.changed().await.is_ok() {}
//!         }
//!     }
//! });
//!
//! let connect = limit
//!     .function(|_addr: &'static str| {
//!         let (open, _) = watch::channel(());
//!         ready(Ok::<_, std::io::Error>(Connection { open }))
//!     })
//!     .unwrap();
//! # drop(connect);
//! ```

use crate::BoxError;
use futures_core::ready;
use std::{
    any::Any,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// The future a [`Termination`] policy returns. The call's slot is released
/// when it completes.
pub type Signal = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A borrowed view of a settled call's outcome. The response can be
/// downcast to the callable's response type.
pub type Outcome<'a> = Result<&'a (dyn Any + Send), &'a BoxError>;

/// How a gated call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The call produced a value.
    Fulfilled,
    /// The call failed, or was dropped before it could settle.
    Rejected,
}

/// Decides when an admitted call releases its slot.
///
/// Any `Fn(Settled) -> impl Future<Output = ()>` closure is a policy:
///
/// ```
/// use tower_gate::Limit;
///
/// // Hold every slot for as long as the call takes, plus one yield.
/// let limit = Limit::new(4).termination(|settled: tower_gate::termination::Settled| async move {
///     settled.await;
///     tokio::task::yield_now().await;
/// });
/// # drop(limit);
/// ```
pub trait Termination: Send + Sync + 'static {
    /// Returns the signal that releases the slot of the call whose outcome
    /// is reported by `settled`.
    fn terminate(&self, settled: Settled) -> Signal;
}

impl<F, Fut> Termination for F
where
    F: Fn(Settled) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn terminate(&self, settled: Settled) -> Signal {
        Box::pin(self(settled))
    }
}

/// The default policy: a slot is released as soon as its call settles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Settle {
    _p: (),
}

impl Settle {
    /// Creates the default termination policy.
    pub fn new() -> Self {
        Settle { _p: () }
    }
}

impl Termination for Settle {
    fn terminate(&self, settled: Settled) -> Signal {
        Box::pin(async move {
            settled.await;
        })
    }
}

/// Completes once the outcome of a gated call has settled.
pub struct Settled {
    rx: oneshot::Receiver<Settlement>,
    inspector: Inspector,
}

/// Where a policy leaves the closure to run on the call's outcome.
pub(crate) type Inspector = Arc<Mutex<Option<Inspect>>>;

type Inspect = Box<dyn for<'a> FnOnce(Outcome<'a>) + Send>;

impl Settled {
    pub(crate) fn pair() -> (oneshot::Sender<Settlement>, Inspector, Settled) {
        let (tx, rx) = oneshot::channel();
        let inspector = Arc::new(Mutex::new(None));
        let settled = Settled {
            rx,
            inspector: inspector.clone(),
        };
        (tx, inspector, settled)
    }

    /// Runs `f` on the call's outcome as soon as it settles, before the
    /// outcome is handed to the caller.
    ///
    /// The returned future resolves to what `f` returned, or to `None` if
    /// the call never settled.
    pub fn inspect<F, U>(self, f: F) -> Inspected<U>
    where
        F: FnOnce(Outcome<'_>) -> U + Send + 'static,
        U: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inspect: Inspect = Box::new(move |outcome: Outcome<'_>| {
            let _ = tx.send(f(outcome));
        });
        *self
            .inspector
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(inspect);
        Inspected { rx }
    }
}

/// Runs the inspector a policy registered, if any.
pub(crate) fn inspect<T>(inspector: &Inspector, outcome: &Result<T, BoxError>)
where
    T: Send + 'static,
{
    let inspect = inspector
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(inspect) = inspect {
        inspect(match outcome {
            Ok(response) => Ok(response as &(dyn Any + Send)),
            Err(e) => Err(e),
        });
    }
}

impl Future for Settled {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(settlement) => Poll::Ready(settlement),
            // The driving task went away without settling the call.
            Err(_) => Poll::Ready(Settlement::Rejected),
        }
    }
}

impl fmt::Debug for Settled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish()
    }
}

/// Future returned by [`Settled::inspect`].
pub struct Inspected<U> {
    rx: oneshot::Receiver<U>,
}

impl<U> Future for Inspected<U> {
    type Output = Option<U>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(ready!(Pin::new(&mut self.rx).poll(cx)).ok())
    }
}

impl<U> fmt::Debug for Inspected<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspected").finish()
    }
}
