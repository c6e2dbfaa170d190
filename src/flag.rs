/// Per-call override of what happens when a gate has no free slot.
///
/// Without a flag a call takes a free slot or waits in line for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Fail with [`error::Full`] instead of waiting in line. The call never
    /// takes a slot or a queue position.
    ///
    /// [`error::Full`]: crate::error::Full
    FailOnFull,
    /// Run right away, outside slot accounting altogether: the call neither
    /// takes a slot nor gives one back when it finishes.
    Bypass,
}

/// Shorthand for [`Flag::FailOnFull`].
pub const FAIL_ON_FULL: Flag = Flag::FailOnFull;

/// Shorthand for [`Flag::Bypass`].
pub const BYPASS: Flag = Flag::Bypass;
