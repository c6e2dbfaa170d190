use super::Gate;
use std::sync::Arc;

/// One slot of a [`Gate`], held by an admitted call.
///
/// Dropping the permit releases the slot: the oldest queued call is started
/// on it, or the slot goes back to the gate.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<Gate>,
}

impl Permit {
    /// The caller must already have taken the slot out of `available`.
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Permit { gate }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
