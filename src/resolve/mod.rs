//! Resolvers pick the gate a call contends on.
//!
//! - [`Shared`]: one gate for every call.
//! - [`PerReceiver`]: one gate per method receiver, without keeping the
//!   receiver alive.
//! - [`Keyed`]: one gate per key derived from the call's arguments.
//! - [`PerReceiverKeyed`]: one gate per key, within each receiver's own key
//!   space.
//!
//! Keyed gates are created on first use and dropped as soon as they go idle,
//! so the number of live gates follows the number of keys in use rather than
//! the number of keys ever seen.

mod keyed;
mod receiver;

pub use self::keyed::{Keyed, PerReceiverKeyed};
pub use self::receiver::PerReceiver;

use crate::gate::{Admission, Gate};
use std::sync::Arc;

/// Maps a call on a receiver of type `R` with arguments `Args` to its gate.
///
/// The admission decision itself always comes from the gate; a resolver only
/// picks which gate gets to make it.
pub trait Resolve<R, Args> {
    /// Identifies the gate within the resolver.
    type Key;

    /// Derives the key of a call. Runs before the call's arguments are
    /// captured.
    fn key(&self, receiver: &R, args: &Args) -> Self::Key;

    /// Runs `admit` against the gate for `key`, creating it if needed.
    fn admit(
        &self,
        receiver: &R,
        key: Self::Key,
        admit: impl FnOnce(&Arc<Gate>) -> Admission,
    ) -> Admission;
}

/// Every call contends on the same gate.
#[derive(Debug, Clone)]
pub struct Shared {
    gate: Arc<Gate>,
}

impl Shared {
    /// Resolves every call to `gate`.
    pub fn new(gate: Arc<Gate>) -> Self {
        Shared { gate }
    }

    /// Returns the shared gate.
    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }
}

impl<R, Args> Resolve<R, Args> for Shared {
    type Key = ();

    fn key(&self, _: &R, _: &Args) -> Self::Key {}

    fn admit(
        &self,
        _: &R,
        _: Self::Key,
        admit: impl FnOnce(&Arc<Gate>) -> Admission,
    ) -> Admission {
        admit(&self.gate)
    }
}
