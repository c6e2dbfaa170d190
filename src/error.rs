//! Error types

use std::fmt;

/// An error returned when a call was made with [`Flag::FailOnFull`] and
/// every slot of its gate was taken.
///
/// [`Flag::FailOnFull`]: crate::Flag::FailOnFull
pub struct Full {
    _p: (),
}

impl Full {
    pub(crate) fn new() -> Self {
        Full { _p: () }
    }
}

impl fmt::Debug for Full {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full")
    }
}

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no available place in queue")
    }
}

impl std::error::Error for Full {}

/// An error produced when the task driving a gated call was dropped before
/// the call settled, usually because the runtime shut down.
pub struct Closed {
    _p: (),
}

impl Closed {
    pub(crate) fn new() -> Self {
        Closed { _p: () }
    }
}

impl fmt::Debug for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Closed").finish()
    }
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("gated call was dropped before it settled")
    }
}

impl std::error::Error for Closed {}

/// An error returned when a [`Limit`] already attached to a function is
/// attached to a method, or the other way around.
///
/// [`Limit`]: crate::Limit
pub struct MixedAttachment {
    _p: (),
}

impl MixedAttachment {
    pub(crate) fn new() -> Self {
        MixedAttachment { _p: () }
    }
}

impl fmt::Debug for MixedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MixedAttachment")
    }
}

impl fmt::Display for MixedAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the same limit cannot be used between function and method")
    }
}

impl std::error::Error for MixedAttachment {}
