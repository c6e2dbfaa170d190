#[path = "../support.rs"]
mod support;

use futures::future::BoxFuture;
use std::sync::Arc;
use tower_gate::{
    error::{Full, MixedAttachment},
    BoxError, Limit,
};

type User = &'static str;
type Request = (User, support::Latched);

fn per_user(
    started: &support::Started,
) -> impl Fn(Request) -> BoxFuture<'static, Result<usize, BoxError>> + Send + Sync + 'static {
    let latched = support::latched(started);
    move |(_, call): Request| latched(call)
}

fn user(request: &Request) -> User {
    request.0
}

fn request(user: User, id: usize) -> (tokio::sync::oneshot::Sender<()>, Request) {
    let (open, call) = support::latch(id);
    (open, (user, call))
}

#[tokio::test(flavor = "current_thread")]
async fn keys_do_not_contend() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limited = Limit::new(1)
        .partition_by::<User, _>(user)
        .function(per_user(&started))
        .unwrap();

    let (open1, alice1) = request("alice", 1);
    let (open2, alice2) = request("alice", 2);
    let (open3, bob3) = request("bob", 3);
    let responses = vec![
        limited.call(alice1),
        limited.call(alice2),
        limited.call(bob3),
    ];

    assert_eq!(started.get(), vec![1, 3]);
    let keyed = limited.resolver().unwrap();
    assert_eq!(keyed.len(), 2);
    assert_eq!(keyed.gate(&"alice").unwrap().pending(), 1);
    assert_eq!(keyed.gate(&"bob").unwrap().pending(), 0);

    drop(open3);
    support::settle().await;
    // Bob's gate went idle and is gone; Alice's call is still waiting.
    assert_eq!(started.get(), vec![1, 3]);
    assert!(keyed.gate(&"bob").is_none());
    assert_eq!(keyed.len(), 1);

    drop(open1);
    support::settle().await;
    assert_eq!(started.get(), vec![1, 3, 2]);

    drop(open2);
    let results = futures::future::try_join_all(responses).await.unwrap();
    assert_eq!(results, vec![1, 2, 3]);
    support::settle().await;
    assert!(keyed.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn gate_is_recreated_after_eviction() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limited = Limit::new(2)
        .partition_by::<User, _>(user)
        .function(per_user(&started))
        .unwrap();
    let keyed = limited.resolver().unwrap();

    let (open, call) = request("alice", 1);
    let first = limited.call(call);
    let gate = keyed.gate(&"alice").unwrap();
    drop(open);
    assert_eq!(first.await.unwrap(), 1);
    support::settle().await;
    assert!(keyed.is_empty());

    let (open, call) = request("alice", 2);
    let second = limited.call(call);
    let recreated = keyed.gate(&"alice").unwrap();
    assert!(!Arc::ptr_eq(&gate, &recreated));
    assert_eq!(recreated.available(), 1);

    drop(open);
    assert_eq!(second.await.unwrap(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn bypassing_a_fresh_key_leaves_no_gate() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limited = Limit::new(1)
        .partition_by::<User, _>(user)
        .function(per_user(&started))
        .unwrap();

    let (_open, call) = request("carol", 1);
    let _response = limited.call_bypassing(call);
    assert_eq!(started.get(), vec![1]);
    assert!(limited.resolver().unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn try_call_fails_per_key() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limited = Limit::new(1)
        .partition_by::<User, _>(user)
        .function(per_user(&started))
        .unwrap();

    let (_open1, alice1) = request("alice", 1);
    let _first = limited.call(alice1);

    let (_open2, alice2) = request("alice", 2);
    let err = limited.try_call(alice2).await.unwrap_err();
    assert!(err.is::<Full>());
    assert_eq!(limited.resolver().unwrap().len(), 1);

    let (open3, bob3) = request("bob", 3);
    let bob = limited.try_call(bob3);
    drop(open3);
    assert_eq!(bob.await.unwrap(), 3);
    assert_eq!(started.get(), vec![1, 3]);
}

struct Tenant {
    started: support::Started,
}

fn serve(
    this: Arc<Tenant>,
    (_, (id, latch)): Request,
) -> BoxFuture<'static, Result<usize, BoxError>> {
    this.started.push(id);
    Box::pin(async move {
        let _ = latch.await;
        Ok(id)
    })
}

fn tenant_user(_: &Tenant, request: &Request) -> User {
    request.0
}

#[tokio::test(flavor = "current_thread")]
async fn keys_are_local_to_each_receiver() {
    let _t = support::trace_init();

    let method = Limit::new(1)
        .partition_by::<User, _>(tenant_user)
        .method(serve)
        .unwrap();

    let a = Arc::new(Tenant {
        started: support::Started::default(),
    });
    let b = Arc::new(Tenant {
        started: support::Started::default(),
    });

    let (open1, a1) = request("alice", 1);
    let (_open2, a2) = request("alice", 2);
    let (_open3, b3) = request("alice", 3);
    let (_open4, a4) = request("bob", 4);
    let first = method.call(&a, a1);
    let _second = method.call(&a, a2);
    let _third = method.call(&b, b3);
    let _fourth = method.call(&a, a4);

    assert_eq!(a.started.get(), vec![1, 4]);
    assert_eq!(b.started.get(), vec![3]);

    let keyed = method.resolver().unwrap();
    assert_eq!(keyed.len(&a), 2);
    assert_eq!(keyed.len(&b), 1);
    assert_eq!(keyed.gate(&a, &"alice").unwrap().pending(), 1);
    assert_eq!(keyed.gate(&b, &"alice").unwrap().pending(), 0);

    drop(open1);
    assert_eq!(first.await.unwrap(), 1);
    support::settle().await;
    assert_eq!(a.started.get(), vec![1, 4, 2]);
}

#[tokio::test(flavor = "current_thread")]
async fn unbounded_keyed_limit_has_no_gates() {
    let _t = support::trace_init();

    let started = support::Started::default();
    let limited = Limit::unbounded()
        .partition_by::<User, _>(user)
        .function(per_user(&started))
        .unwrap();
    assert!(limited.resolver().is_none());

    let (_open1, alice1) = request("alice", 1);
    let (_open2, alice2) = request("alice", 2);
    let _first = limited.call(alice1);
    let _second = limited.call(alice2);
    assert_eq!(started.get(), vec![1, 2]);
}

#[tokio::test(flavor = "current_thread")]
async fn keyed_function_limit_cannot_be_used_for_methods() {
    let started = support::Started::default();
    let limit = Limit::new(2).partition_by::<User, _>(user);
    limit.function(per_user(&started)).unwrap();

    let err: MixedAttachment = limit.method(serve).unwrap_err();
    assert!(err.to_string().contains("between function and method"));

    // The limit stays usable for functions, clones included.
    assert!(limit.clone().function(per_user(&started)).is_ok());
}

#[tokio::test(flavor = "current_thread")]
async fn keyed_method_limit_cannot_be_used_for_functions() {
    let started = support::Started::default();
    let limit = Limit::new(2).partition_by::<User, _>(tenant_user);
    limit.method(serve).unwrap();

    let err = limit.function(per_user(&started)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "the same limit cannot be used between function and method"
    );
    assert!(limit.method(serve).is_ok());
}
