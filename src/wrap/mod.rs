//! Gated wrappers around functions and methods.
//!
//! [`Limited`] wraps a function; [`LimitedMethod`] wraps a method, a function
//! taking an `Arc` receiver as its first argument. Both return a
//! [`ResponseFuture`] right away: the call either starts on the spot or
//! waits in its gate's queue, and the caller is never blocked.
//!
//! Calls are started on the Tokio runtime the wrapper is called from, so
//! they make progress whether or not their `ResponseFuture` is polled.
//! Dropping a `ResponseFuture` discards the outcome but does not withdraw the
//! call.

pub mod future;

use self::future::ResponseFuture;
use crate::{
    error::Full,
    gate::{Admission, Gate, Record, Rx, Start},
    resolve::{PerReceiver, Resolve, Shared},
    termination::{Settle, Termination},
    BoxError, Flag,
};
use std::{
    fmt,
    future::Future,
    sync::Arc,
    task::{Context, Poll},
};
use tower_service::Service;

/// An async function that can be gated.
///
/// Implemented for every `Fn(Args) -> impl Future<Output = Result<T, E>>`.
/// A function taking several arguments takes them as a tuple. A function
/// producing a plain value returns it through [`std::future::ready`].
pub trait Callable<Args>: Send + Sync + 'static {
    /// Value produced by a successful call.
    type Response: Send + 'static;
    /// Error produced by a failed call.
    type Error: Into<BoxError>;
    /// The call in progress.
    type Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Starts a call.
    fn invoke(&self, args: Args) -> Self::Future;
}

impl<F, Args, Fut, T, E> Callable<Args> for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError>,
{
    type Response = T;
    type Error = E;
    type Future = Fut;

    fn invoke(&self, args: Args) -> Self::Future {
        self(args)
    }
}

/// An async method on `R` that can be gated.
///
/// Implemented for every
/// `Fn(Arc<R>, Args) -> impl Future<Output = Result<T, E>>`.
pub trait Method<R, Args>: Send + Sync + 'static {
    /// Value produced by a successful call.
    type Response: Send + 'static;
    /// Error produced by a failed call.
    type Error: Into<BoxError>;
    /// The call in progress.
    type Future: Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Starts a call on `receiver`.
    fn invoke(&self, receiver: Arc<R>, args: Args) -> Self::Future;
}

impl<F, R, Args, Fut, T, E> Method<R, Args> for F
where
    F: Fn(Arc<R>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError>,
{
    type Response = T;
    type Error = E;
    type Future = Fut;

    fn invoke(&self, receiver: Arc<R>, args: Args) -> Self::Future {
        self(receiver, args)
    }
}

/// A function whose concurrent calls are bounded by a gate.
///
/// Created by [`Limit::function`], or directly with [`Limited::new`] and
/// [`Limited::with_gate`].
///
/// Calls are started on the Tokio runtime they are made from. A call made
/// outside any runtime fails with [`TryCurrentError`].
///
/// [`TryCurrentError`]: tokio::runtime::TryCurrentError
/// [`Limit::function`]: crate::Limit::function
pub struct Limited<F, Res = Shared> {
    callable: Arc<F>,
    // `None` for an unbounded limit: every call runs right away.
    resolver: Option<Res>,
    termination: Arc<dyn Termination>,
}

impl<F> Limited<F, Shared> {
    /// Wraps `f` so that at most `capacity` calls run at once. A capacity of
    /// zero means no limit.
    pub fn new(capacity: usize, f: F) -> Self {
        let resolver = if capacity == 0 {
            None
        } else {
            Some(Shared::new(Gate::new(capacity)))
        };
        Limited::from_parts(f, resolver, Arc::new(Settle::new()))
    }

    /// Wraps `f` so that its calls contend for the slots of `gate`, along
    /// with the calls of every other wrapper sharing it.
    pub fn with_gate(gate: Arc<Gate>, f: F) -> Self {
        Limited::from_parts(f, Some(Shared::new(gate)), Arc::new(Settle::new()))
    }

    /// Returns the gate of this function, or `None` if it is unbounded.
    pub fn gate(&self) -> Option<&Arc<Gate>> {
        self.resolver.as_ref().map(Shared::gate)
    }
}

impl<F, Res> Limited<F, Res> {
    pub(crate) fn from_parts(
        f: F,
        resolver: Option<Res>,
        termination: Arc<dyn Termination>,
    ) -> Self {
        Limited {
            callable: Arc::new(f),
            resolver,
            termination,
        }
    }

    /// Replaces the termination policy of this wrapper.
    pub fn termination<P>(mut self, policy: P) -> Self
    where
        P: Termination,
    {
        self.termination = Arc::new(policy);
        self
    }

    /// Returns a reference to the wrapped function.
    pub fn get_ref(&self) -> &F {
        &self.callable
    }

    /// Returns the resolver picking the gate of each call, or `None` if the
    /// function is unbounded.
    pub fn resolver(&self) -> Option<&Res> {
        self.resolver.as_ref()
    }

    /// Calls the function, waiting in line if the gate is full.
    pub fn call<Args>(&self, args: Args) -> ResponseFuture<F::Response>
    where
        F: Callable<Args>,
        Res: Resolve<(), Args>,
        Args: Send + 'static,
    {
        self.call_with(None, args)
    }

    /// Calls the function, failing with [`Full`] if the gate is full.
    pub fn try_call<Args>(&self, args: Args) -> ResponseFuture<F::Response>
    where
        F: Callable<Args>,
        Res: Resolve<(), Args>,
        Args: Send + 'static,
    {
        self.call_with(Some(Flag::FailOnFull), args)
    }

    /// Calls the function right away, outside the gate's slot accounting.
    pub fn call_bypassing<Args>(&self, args: Args) -> ResponseFuture<F::Response>
    where
        F: Callable<Args>,
        Res: Resolve<(), Args>,
        Args: Send + 'static,
    {
        self.call_with(Some(Flag::Bypass), args)
    }

    /// Calls the function with an optional [`Flag`].
    pub fn call_with<Args>(&self, flag: Option<Flag>, args: Args) -> ResponseFuture<F::Response>
    where
        F: Callable<Args>,
        Res: Resolve<(), Args>,
        Args: Send + 'static,
    {
        let (record, rx): (_, Rx<F::Response>) =
            match Record::new(self.callable.clone(), (), args, self.termination.clone()) {
                Ok(captured) => captured,
                Err(e) => return ResponseFuture::failed(Box::new(e)),
            };
        let resolver = match self.resolver {
            Some(ref resolver) => resolver,
            None => {
                Box::new(record).start(None);
                return ResponseFuture::new(rx);
            }
        };

        let key = resolver.key(&(), record.args());
        let admission = resolver.admit(&(), key, |gate| gate.admit(flag, Box::new(record)));
        settle(admission, rx)
    }
}

/// A method whose concurrent calls are bounded by a gate per receiver.
///
/// Created by [`Limit::method`], or directly with [`LimitedMethod::new`].
/// Calls on different receivers never contend with each other.
///
/// Like [`Limited`], calls fail with [`TryCurrentError`] when made outside a
/// Tokio runtime.
///
/// [`TryCurrentError`]: tokio::runtime::TryCurrentError
/// [`Limit::method`]: crate::Limit::method
pub struct LimitedMethod<F, Res = PerReceiver> {
    callable: Arc<F>,
    resolver: Option<Res>,
    termination: Arc<dyn Termination>,
}

impl<F> LimitedMethod<F, PerReceiver> {
    /// Wraps `f` so that at most `capacity` calls run at once on any one
    /// receiver. A capacity of zero means no limit.
    pub fn new(capacity: usize, f: F) -> Self {
        let resolver = if capacity == 0 {
            None
        } else {
            Some(PerReceiver::new(capacity))
        };
        LimitedMethod::from_parts(f, resolver, Arc::new(Settle::new()))
    }
}

impl<F, Res> LimitedMethod<F, Res> {
    pub(crate) fn from_parts(
        f: F,
        resolver: Option<Res>,
        termination: Arc<dyn Termination>,
    ) -> Self {
        LimitedMethod {
            callable: Arc::new(f),
            resolver,
            termination,
        }
    }

    /// Replaces the termination policy of this wrapper.
    pub fn termination<P>(mut self, policy: P) -> Self
    where
        P: Termination,
    {
        self.termination = Arc::new(policy);
        self
    }

    /// Returns a reference to the wrapped method.
    pub fn get_ref(&self) -> &F {
        &self.callable
    }

    /// Returns the resolver picking the gate of each call, or `None` if the
    /// method is unbounded.
    pub fn resolver(&self) -> Option<&Res> {
        self.resolver.as_ref()
    }

    /// Calls the method on `receiver`, waiting in line if its gate is full.
    pub fn call<R, Args>(&self, receiver: &Arc<R>, args: Args) -> ResponseFuture<F::Response>
    where
        F: Method<R, Args>,
        Res: Resolve<Arc<R>, Args>,
        R: Send + Sync + 'static,
        Args: Send + 'static,
    {
        self.call_with(None, receiver, args)
    }

    /// Calls the method on `receiver`, failing with [`Full`] if its gate is
    /// full.
    pub fn try_call<R, Args>(&self, receiver: &Arc<R>, args: Args) -> ResponseFuture<F::Response>
    where
        F: Method<R, Args>,
        Res: Resolve<Arc<R>, Args>,
        R: Send + Sync + 'static,
        Args: Send + 'static,
    {
        self.call_with(Some(Flag::FailOnFull), receiver, args)
    }

    /// Calls the method on `receiver` right away, outside slot accounting.
    pub fn call_bypassing<R, Args>(
        &self,
        receiver: &Arc<R>,
        args: Args,
    ) -> ResponseFuture<F::Response>
    where
        F: Method<R, Args>,
        Res: Resolve<Arc<R>, Args>,
        R: Send + Sync + 'static,
        Args: Send + 'static,
    {
        self.call_with(Some(Flag::Bypass), receiver, args)
    }

    /// Calls the method on `receiver` with an optional [`Flag`].
    pub fn call_with<R, Args>(
        &self,
        flag: Option<Flag>,
        receiver: &Arc<R>,
        args: Args,
    ) -> ResponseFuture<F::Response>
    where
        F: Method<R, Args>,
        Res: Resolve<Arc<R>, Args>,
        R: Send + Sync + 'static,
        Args: Send + 'static,
    {
        let captured = Record::new(
            self.callable.clone(),
            receiver.clone(),
            args,
            self.termination.clone(),
        );
        let (record, rx): (_, Rx<F::Response>) = match captured {
            Ok(captured) => captured,
            Err(e) => return ResponseFuture::failed(Box::new(e)),
        };
        let resolver = match self.resolver {
            Some(ref resolver) => resolver,
            None => {
                Box::new(record).start(None);
                return ResponseFuture::new(rx);
            }
        };

        let key = resolver.key(receiver, record.args());
        let admission = resolver.admit(receiver, key, |gate| gate.admit(flag, Box::new(record)));
        settle(admission, rx)
    }
}

/// Acts on the gate's decision, outside every lock.
fn settle<T>(admission: Admission, rx: Rx<T>) -> ResponseFuture<T> {
    match admission {
        Admission::Run(call, permit) => {
            call.start(permit);
            ResponseFuture::new(rx)
        }
        Admission::Queued => ResponseFuture::new(rx),
        Admission::Full => ResponseFuture::failed(Full::new().into()),
    }
}

impl<F, Res, Args> Service<Args> for Limited<F, Res>
where
    F: Callable<Args>,
    Res: Resolve<(), Args>,
    Args: Send + 'static,
{
    type Response = F::Response;
    type Error = BoxError;
    type Future = ResponseFuture<F::Response>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission is decided per call and never makes the caller wait.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, args: Args) -> Self::Future {
        Limited::call_with(self, None, args)
    }
}

impl<F, Res: Clone> Clone for Limited<F, Res> {
    fn clone(&self) -> Self {
        Limited {
            callable: self.callable.clone(),
            resolver: self.resolver.clone(),
            termination: self.termination.clone(),
        }
    }
}

impl<F, Res: Clone> Clone for LimitedMethod<F, Res> {
    fn clone(&self) -> Self {
        LimitedMethod {
            callable: self.callable.clone(),
            resolver: self.resolver.clone(),
            termination: self.termination.clone(),
        }
    }
}

impl<F, Res: fmt::Debug> fmt::Debug for Limited<F, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limited")
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl<F, Res: fmt::Debug> fmt::Debug for LimitedMethod<F, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitedMethod")
            .field("resolver", &self.resolver)
            .finish()
    }
}
