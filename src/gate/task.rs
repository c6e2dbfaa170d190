use super::{record::Tx, Permit};
use crate::{
    termination::{self, Inspector, Settlement, Signal},
    BoxError,
};
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

pin_project! {
    /// Drives a started call to completion and holds its slot until the
    /// termination signal fires.
    ///
    /// The two halves are independent: a custom signal may fire before the
    /// call settles, or long after.
    pub(crate) struct Task<F, T> {
        #[pin]
        call: F,
        // `None` once the call has settled.
        outcome: Option<Delivery<T>>,
        // `None` once the slot has been released, or for bypassing calls.
        signal: Option<Signal>,
        permit: Option<Permit>,
    }
}

/// Where a settled call's outcome goes.
pub(crate) struct Delivery<T> {
    tx: Tx<T>,
    settle: oneshot::Sender<Settlement>,
    inspector: Inspector,
}

impl<T> Delivery<T> {
    pub(crate) fn new(tx: Tx<T>, settle: oneshot::Sender<Settlement>, inspector: Inspector) -> Self {
        Delivery {
            tx,
            settle,
            inspector,
        }
    }
}

impl<F, T> Task<F, T> {
    pub(crate) fn new(
        call: F,
        outcome: Delivery<T>,
        signal: Option<Signal>,
        permit: Option<Permit>,
    ) -> Self {
        Task {
            call,
            outcome: Some(outcome),
            signal,
            permit,
        }
    }
}

impl<F, T, E> Future for Task<F, T>
where
    F: Future<Output = Result<T, E>>,
    T: Send + 'static,
    E: Into<BoxError>,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // A policy may only ask to inspect the outcome once its signal runs,
        // so the signal gets a look before the call can settle.
        poll_signal(this.signal, this.permit, cx);

        if this.outcome.is_some() {
            if let Poll::Ready(result) = this.call.poll(cx) {
                if let Some(outcome) = this.outcome.take() {
                    let result = result.map_err(Into::into);
                    let settlement = match result {
                        Ok(_) => Settlement::Fulfilled,
                        Err(_) => Settlement::Rejected,
                    };
                    termination::inspect(&outcome.inspector, &result);
                    // Nobody may be waiting on either side any more; the
                    // call has still run to completion.
                    let _ = outcome.tx.send(result);
                    let _ = outcome.settle.send(settlement);
                    tracing::trace!(?settlement, "gated call settled");
                }
            }
        }

        poll_signal(this.signal, this.permit, cx);

        if this.outcome.is_none() && this.signal.is_none() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

fn poll_signal(signal: &mut Option<Signal>, permit: &mut Option<Permit>, cx: &mut Context<'_>) {
    if let Some(pending) = signal.as_mut() {
        if pending.as_mut().poll(cx).is_ready() {
            *signal = None;
            tracing::trace!("termination signal fired");
            // May start the next queued call.
            drop(permit.take());
        }
    }
}
