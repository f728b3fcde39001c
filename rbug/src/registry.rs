//! Correlation tables mapping reply serials and event opcodes to
//! callbacks.
//!
//! The reply table is strictly one-shot: an entry is removed before its
//! callback runs, so the callback may re-register under a fresh serial
//! (the multi-step actions do exactly that). The event table persists
//! across invocations; handlers are invoked through a shared handle so
//! the entry stays live while a handler runs and a nested drain can
//! dispatch further events of the same opcode to it. A handler's
//! return value decides whether it stays registered.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use rbug_proto::Message;

use crate::session::Session;

/// Callback for a single reply, invoked at most once.
///
/// The handler is removed from the registry before it runs and consumes
/// itself; registering a follow-up request under a new serial from
/// inside `on_reply` is allowed and is how multi-step actions advance.
pub trait ReplyHandler {
    /// Handles the reply to the request registered under this serial.
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message);
}

/// Whether an event handler stays registered after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Leave the handler registered for the next event.
    Keep,
    /// Drop the registration; later events of this opcode are dropped.
    Remove,
}

/// Callback for server-pushed events of one opcode.
///
/// The registry keeps the handler registered while it runs, and a
/// drain started from inside `on_event` can re-enter it for the next
/// event of the same opcode; implementations keep mutable state in
/// `Cell`/`RefCell`.
pub trait EventHandler {
    /// Handles one event; the return value controls re-registration.
    fn on_event(&self, session: &mut Session, msg: &Message) -> EventDisposition;
}

/// The two correlation tables of one connection.
#[derive(Default)]
pub(crate) struct Registry {
    /// Outstanding request serials to their one-shot reply callbacks.
    replies: HashMap<u32, Box<dyn ReplyHandler>>,
    /// Event opcodes to their persistent handlers.
    events: HashMap<i32, Rc<dyn EventHandler>>,
}

impl Registry {
    /// Registers a one-shot reply callback for a request serial.
    ///
    /// # Panics
    ///
    /// Panics if the serial already has a waiter. Serials are unique
    /// among in-flight requests; a duplicate is a programming error.
    pub(crate) fn register_reply(&mut self, serial: u32, handler: Box<dyn ReplyHandler>) {
        let prev = self.replies.insert(serial, handler);
        assert!(
            prev.is_none(),
            "reply callback already registered for serial {serial}"
        );
    }

    /// Registers (or replaces) the handler for an event opcode.
    pub(crate) fn register_event(&mut self, op: i32, handler: Box<dyn EventHandler>) {
        self.events.insert(op, Rc::from(handler));
    }

    /// Removes and returns the reply callback for `serial`, if any.
    pub(crate) fn take_reply(&mut self, serial: u32) -> Option<Box<dyn ReplyHandler>> {
        self.replies.remove(&serial)
    }

    /// Shared handle to the event handler for `op`, if any.
    ///
    /// The entry is left in the table, so further events of the same
    /// opcode arriving while the handler runs dispatch to it normally.
    pub(crate) fn event(&self, op: i32) -> Option<Rc<dyn EventHandler>> {
        self.events.get(&op).map(Rc::clone)
    }

    /// Removes the handler for `op` if it is still `handler`.
    ///
    /// If a replacement was registered for the opcode while the handler
    /// ran, the replacement wins and stays.
    pub(crate) fn remove_event_if(&mut self, op: i32, handler: &Rc<dyn EventHandler>) {
        if self
            .events
            .get(&op)
            .is_some_and(|current| Rc::ptr_eq(current, handler))
        {
            self.events.remove(&op);
        }
    }

    /// Number of outstanding reply registrations.
    pub(crate) fn reply_count(&self) -> usize {
        self.replies.len()
    }

    /// Drops every registration; handlers release their actions.
    pub(crate) fn clear(&mut self) {
        self.replies.clear();
        self.events.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("replies", &self.replies.len())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish()
    }
}
