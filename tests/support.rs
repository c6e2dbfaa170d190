#![allow(dead_code)]

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_gate::BoxError;

pub(crate) fn trace_init() -> tracing::subscriber::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Records the order in which calls were started.
#[derive(Clone, Debug, Default)]
pub(crate) struct Started(Arc<Mutex<Vec<usize>>>);

impl Started {
    pub(crate) fn push(&self, id: usize) {
        self.0.lock().unwrap().push(id);
    }

    pub(crate) fn get(&self) -> Vec<usize> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A call that runs until its latch is opened.
pub(crate) type Latched = (usize, oneshot::Receiver<()>);

/// Returns a callable that records each call's id when started and only
/// completes, with that id, once the call's latch is opened or dropped.
pub(crate) fn latched(
    started: &Started,
) -> impl Fn(Latched) -> BoxFuture<'static, Result<usize, BoxError>> + Send + Sync + 'static {
    let started = started.clone();
    move |(id, latch): Latched| -> BoxFuture<'static, Result<usize, BoxError>> {
        started.push(id);
        Box::pin(async move {
            let _ = latch.await;
            Ok::<_, BoxError>(id)
        })
    }
}

/// Creates the latch for call `id`.
pub(crate) fn latch(id: usize) -> (oneshot::Sender<()>, Latched) {
    let (tx, rx) = oneshot::channel();
    (tx, (id, rx))
}

/// Lets every runnable task make progress.
pub(crate) async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}
