#![doc(html_root_url = "https://docs.rs/tower-gate/0.1.0")]
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bound the number of concurrent calls to an async function.
//!
//! A [`Limited`] function lets at most `capacity` of its calls run at once.
//! Calls beyond that wait in a first-in, first-out queue and are started, in
//! arrival order, as running calls finish. Calling never blocks: every call
//! returns a [`ResponseFuture`] right away, and queued calls are started on
//! the Tokio runtime they were made from.
//!
//! ```
//! use std::future::ready;
//! use tower_gate::Limited;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let echo = Limited::new(2, |value: &'static str| ready(Ok::<_, std::io::Error>(value)));
//!
//! let calls = vec![echo.call("foo"), echo.call("bar"), echo.call("baz")];
//! // Two calls are running, the third waits for a slot.
//! assert_eq!(echo.gate().unwrap().pending(), 1);
//!
//! let mut results = Vec::new();
//! for call in calls {
//!     results.push(call.await.unwrap());
//! }
//! assert_eq!(results, ["foo", "bar", "baz"]);
//! # }
//! ```
//!
//! # Gates
//!
//! The [`Gate`] does the bookkeeping: free slots, the queue of waiting calls,
//! and handing a freed slot straight to the oldest waiting call. Which gate a
//! call contends on is decided by a [resolver](resolve):
//!
//! - a [`Limited`] function uses one gate for all its calls, and several
//!   functions can share one gate;
//! - a [`LimitedMethod`] uses one gate per receiver;
//! - a [`KeyedLimit`] uses one gate per key derived from each call, dropping
//!   gates as soon as they go idle.
//!
//! # Flags
//!
//! Each call can override what happens when its gate is full with a
//! [`Flag`]: [`Flag::FailOnFull`] fails the call with [`error::Full`]
//! instead of queueing it, and [`Flag::Bypass`] runs it right away, outside
//! slot accounting.
//!
//! # Termination
//!
//! A call holds its slot until its outcome settles, unless a
//! [`Termination`](termination::Termination) policy says otherwise.

pub mod error;
pub mod resolve;
pub mod termination;
pub mod wrap;

mod flag;
mod gate;
mod limit;
mod queue;

pub use crate::{
    flag::{Flag, BYPASS, FAIL_ON_FULL},
    gate::Gate,
    limit::{KeyedLimit, Limit},
    queue::Queue,
    wrap::{future::ResponseFuture, Limited, LimitedMethod},
};

/// Alias for a type-erased error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
