//! Future types

use crate::{error::Closed, gate::Rx, BoxError};
use futures_core::ready;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Future that resolves to the outcome of a gated call, once the call has
/// been admitted and has settled.
pub struct ResponseFuture<T> {
    state: ResponseState<T>,
}

enum ResponseState<T> {
    Failed(Option<BoxError>),
    Rx(Rx<T>),
}

impl<T> ResponseFuture<T> {
    pub(crate) fn new(rx: Rx<T>) -> Self {
        ResponseFuture {
            state: ResponseState::Rx(rx),
        }
    }

    pub(crate) fn failed(err: BoxError) -> Self {
        ResponseFuture {
            state: ResponseState::Failed(Some(err)),
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, BoxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.state {
            ResponseState::Failed(ref mut e) => {
                Poll::Ready(Err(e.take().expect("polled after error")))
            }
            ResponseState::Rx(ref mut rx) => match ready!(Pin::new(rx).poll(cx)) {
                Ok(outcome) => Poll::Ready(outcome),
                Err(_) => Poll::Ready(Err(Closed::new().into())),
            },
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ResponseState::Failed(_) => "Failed",
            ResponseState::Rx(_) => "Waiting",
        };
        f.debug_struct("ResponseFuture")
            .field("state", &state)
            .finish()
    }
}
