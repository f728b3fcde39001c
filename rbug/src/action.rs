//! Shared lifecycle for in-flight actions.

/// Deferred-destruction state of a multi-step action.
///
/// An action shared between a registry callback and the session's
/// current-target slot cannot be freed while a reply for it is still on
/// the wire. Cancellation therefore only flips the state to
/// `Cancelled`; the callback observes it when the reply finally arrives
/// and tears down without side effects. The action's memory is released
/// when the last `Rc` handle drops, which makes the release exactly
/// once by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The owner still wants results.
    Active,
    /// The owner lost interest; pending replies are discarded.
    Cancelled,
    /// The action ran to completion.
    Done,
}

impl Lifecycle {
    /// Whether results should still be applied.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}
