#[path = "../support.rs"]
mod support;

use std::{
    future::ready,
    sync::{Arc, Mutex},
};
use tokio::sync::{watch, Notify};
use tower_gate::{
    error::Full,
    termination::{Settled, Settlement},
    BoxError, Limit, Limited,
};

#[tokio::test(flavor = "current_thread")]
async fn slot_is_held_until_signal_fires() {
    let _t = support::trace_init();

    let notify = Arc::new(Notify::new());
    let release = notify.clone();
    let limited = Limited::new(1, |value: u32| ready(Ok::<_, BoxError>(value))).termination(
        move |settled: Settled| {
            let release = release.clone();
            async move {
                settled.await;
                release.notified().await;
            }
        },
    );

    assert_eq!(limited.call(1).await.unwrap(), 1);
    support::settle().await;

    // Settled, but still holding its slot.
    let err = limited.try_call(2).await.unwrap_err();
    assert!(err.is::<Full>());

    notify.notify_one();
    support::settle().await;

    assert_eq!(limited.try_call(3).await.unwrap(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn signal_may_fire_before_call_settles() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limit = Limit::new(1).termination(|_: Settled| async {});
    let limited = limit.function(support::latched(&started)).unwrap();

    let (open1, call1) = support::latch(1);
    let (open2, call2) = support::latch(2);
    let first = limited.call(call1);
    let second = limited.call(call2);
    assert_eq!(started.get(), vec![1]);

    // The first call gave its slot back without finishing.
    support::settle().await;
    assert_eq!(started.get(), vec![1, 2]);

    drop((open1, open2));
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn policy_sees_how_the_call_settled() {
    let _t = support::trace_init();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let limited = Limited::new(2, |ok: bool| {
        ready(if ok {
            Ok(())
        } else {
            Err::<(), BoxError>("nope".into())
        })
    })
    .termination(move |settled: Settled| {
        let record = record.clone();
        async move {
            let settlement = settled.await;
            record.lock().unwrap().push(settlement);
        }
    });

    limited.call(true).await.unwrap();
    limited.call(false).await.unwrap_err();
    support::settle().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Settlement::Fulfilled, Settlement::Rejected]
    );
    assert!(limited.gate().unwrap().is_idle());
}

#[tokio::test(flavor = "current_thread")]
async fn bypassing_call_never_consults_policy() {
    let _t = support::trace_init();

    let consulted = Arc::new(Mutex::new(0));
    let counter = consulted.clone();
    let limited = Limited::new(1, |value: u32| ready(Ok::<_, BoxError>(value))).termination(
        move |settled: Settled| {
            *counter.lock().unwrap() += 1;
            async move {
                settled.await;
            }
        },
    );

    assert_eq!(limited.call_bypassing(7).await.unwrap(), 7);
    assert_eq!(*consulted.lock().unwrap(), 0);

    assert_eq!(limited.call(8).await.unwrap(), 8);
    assert_eq!(*consulted.lock().unwrap(), 1);
}

/// A handle returned by a gated call, open until dropped.
#[derive(Debug)]
struct Connection {
    open: watch::Sender<()>,
}

/// Holds a call's slot until the `Connection` it returned is dropped.
fn until_closed(settled: Settled) -> impl std::future::Future<Output = ()> + Send {
    let closed = settled.inspect(|outcome| {
        outcome
            .ok()
            .and_then(|response| response.downcast_ref::<Connection>())
            .map(|connection| connection.open.subscribe())
    });
    async move {
        if let Some(Some(mut open)) = closed.await {
            while open.changed().await.is_ok() {}
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn slot_is_held_until_returned_handle_closes() {
    let _t = support::trace_init();

    let limited = Limited::new(1, |_: ()| {
        let (open, _) = watch::channel(());
        ready(Ok::<_, BoxError>(Connection { open }))
    })
    .termination(until_closed);

    let connection = limited.call(()).await.unwrap();
    support::settle().await;

    let err = limited.try_call(()).await.unwrap_err();
    assert!(err.is::<Full>());

    drop(connection);
    support::settle().await;

    let again = limited.try_call(()).await.unwrap();
    assert_eq!(limited.gate().unwrap().available(), 0);
    drop(again);
    support::settle().await;
    assert!(limited.gate().unwrap().is_idle());
}

#[tokio::test(flavor = "current_thread")]
async fn policy_can_inspect_a_failure() {
    let _t = support::trace_init();

    let (seen_tx, seen) = tokio::sync::oneshot::channel();
    let seen_tx = Mutex::new(Some(seen_tx));
    let limited = Limited::new(1, |_: ()| {
        ready(Err::<Connection, BoxError>("refused".into()))
    })
    .termination(move |settled: Settled| {
        let seen_tx = seen_tx.lock().unwrap().take();
        let message = settled.inspect(|outcome| outcome.err().map(ToString::to_string));
        async move {
            if let (Some(tx), Some(message)) = (seen_tx, message.await) {
                let _ = tx.send(message);
            }
        }
    });

    let err = limited.call(()).await.unwrap_err();
    assert_eq!(err.to_string(), "refused");
    assert_eq!(seen.await.unwrap().as_deref(), Some("refused"));

    support::settle().await;
    assert!(limited.gate().unwrap().is_idle());
}
