use super::{
    task::{Delivery, Task},
    Permit,
};
use crate::{
    termination::{Settled, Termination},
    wrap::{Callable, Method},
    BoxError,
};
use std::sync::Arc;
use tokio::{
    runtime::{Handle, TryCurrentError},
    sync::oneshot,
};

/// A call that has been decided on but not started yet.
pub type Deferred = Box<dyn Start + Send>;

/// Starts a deferred call, on a slot of its gate or, when bypassing, on none.
pub trait Start {
    /// Invokes the callable right away and hands its future to the runtime.
    fn start(self: Box<Self>, permit: Option<Permit>);

    /// Hands the call to its runtime, to be invoked when the runtime first
    /// polls it. If the runtime is gone, the call is dropped uninvoked.
    fn resume(self: Box<Self>, permit: Permit);
}

/// Outcome sender.
pub(crate) type Tx<T> = oneshot::Sender<Result<T, BoxError>>;

/// Outcome receiver.
pub(crate) type Rx<T> = oneshot::Receiver<Result<T, BoxError>>;

/// Everything needed to run one gated call later: the callable, the
/// receiver it is invoked on, its arguments and where its outcome goes.
///
/// Function calls use `()` as their receiver.
pub(crate) struct Record<C, R, A, T> {
    callable: Arc<C>,
    receiver: R,
    args: A,
    tx: Tx<T>,
    termination: Arc<dyn Termination>,
    runtime: Handle,
}

impl<C, R, A, T> Record<C, R, A, T> {
    /// Captures a call on the runtime it is made from.
    pub(crate) fn new(
        callable: Arc<C>,
        receiver: R,
        args: A,
        termination: Arc<dyn Termination>,
    ) -> Result<(Self, Rx<T>), TryCurrentError> {
        let runtime = Handle::try_current()?;
        let (tx, rx) = oneshot::channel();
        let record = Record {
            callable,
            receiver,
            args,
            tx,
            termination,
            runtime,
        };
        Ok((record, rx))
    }

    pub(crate) fn args(&self) -> &A {
        &self.args
    }
}

impl<C, A, T> Start for Record<C, (), A, T>
where
    C: Callable<A, Response = T>,
    A: Send + 'static,
    T: Send + 'static,
{
    fn start(self: Box<Self>, permit: Option<Permit>) {
        let Record {
            callable,
            receiver: (),
            args,
            tx,
            termination,
            runtime,
        } = *self;
        let call = callable.invoke(args);
        runtime.spawn(task(call, tx, &*termination, permit));
    }

    fn resume(self: Box<Self>, permit: Permit) {
        let Record {
            callable,
            receiver: (),
            args,
            tx,
            termination,
            runtime,
        } = *self;
        runtime.spawn(async move {
            let call = callable.invoke(args);
            let driver = task(call, tx, &*termination, Some(permit));
            driver.await
        });
    }
}

impl<C, R, A, T> Start for Record<C, Arc<R>, A, T>
where
    C: Method<R, A, Response = T>,
    R: Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
{
    fn start(self: Box<Self>, permit: Option<Permit>) {
        let Record {
            callable,
            receiver,
            args,
            tx,
            termination,
            runtime,
        } = *self;
        let call = callable.invoke(receiver, args);
        runtime.spawn(task(call, tx, &*termination, permit));
    }

    fn resume(self: Box<Self>, permit: Permit) {
        let Record {
            callable,
            receiver,
            args,
            tx,
            termination,
            runtime,
        } = *self;
        runtime.spawn(async move {
            let call = callable.invoke(receiver, args);
            let driver = task(call, tx, &*termination, Some(permit));
            driver.await
        });
    }
}

fn task<F, T>(
    call: F,
    tx: Tx<T>,
    termination: &dyn Termination,
    permit: Option<Permit>,
) -> Task<F, T> {
    let (settle, inspector, settled) = Settled::pair();
    // Bypassing calls hold no slot, so there is nothing to wait for.
    let signal = permit
        .as_ref()
        .map(|_| termination.terminate(settled));
    Task::new(call, Delivery::new(tx, settle, inspector), signal, permit)
}
