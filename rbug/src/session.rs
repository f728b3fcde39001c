//! The debugger session: one socket, one codec, both correlation
//! tables, and the dispatch loop that drives them.
//!
//! Everything runs on one thread. An action "suspends" between sending
//! a request and receiving its reply simply by returning to the caller;
//! its registry entry is the suspended continuation. The only reentrant
//! entry point is [`Session::finish_and_emit_events`], which drives the
//! same dispatch loop from arbitrary callback depth.

use std::fmt;
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

use rbug_proto::Message;
use tracing::{debug, error, trace, warn};

use crate::action::Lifecycle;
use crate::error::{Error, Result};
use crate::model::{Model, ObjectKind};
#[cfg(unix)]
use crate::poll;
#[cfg(unix)]
use crate::poll::Readiness;
use crate::registry::{EventDisposition, EventHandler, Registry, ReplyHandler};
use crate::{connect, context, shader, texture};

/// Byte stream the session multiplexes; anything both `Read` and
/// `Write` (a `TcpStream` in production, an in-memory pipe in tests).
pub trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}

/// Connection lifecycle.
///
/// Dispatch, drain and send operate only in `Connected`. Any codec
/// failure or an explicit close moves through `Closing` (releasing both
/// tables and notifying the model) to the terminal `Closed`; a new
/// connection requires a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// The stream is open but the session is still initializing.
    Connecting,
    /// Fully operational.
    Connected,
    /// Teardown in progress.
    Closing,
    /// Terminal; the session can only be dropped.
    Closed,
}

/// Current-target slots for the de-duplicated action kinds.
///
/// At most one pixel download and one viewed-shader describe may be in
/// flight at a time; starting a new one for a different target cancels
/// the slotted one.
#[derive(Default)]
pub(crate) struct ViewSlots {
    /// The in-flight texture download, if any.
    pub(crate) read: Option<texture::ReadAction>,
    /// The in-flight describe for the viewed shader, if any.
    pub(crate) shader: Option<shader::InfoAction>,
}

impl ViewSlots {
    /// Cancels whatever is slotted; used on teardown.
    fn reset(&mut self) {
        if let Some(action) = self.read.take() {
            action.borrow_mut().life = Lifecycle::Cancelled;
        }
        if let Some(action) = self.shader.take() {
            action.borrow_mut().life = Lifecycle::Cancelled;
        }
    }
}

/// One live debugger connection.
///
/// The session is the explicit context object every callback receives:
/// it owns the stream, the serial counter, the dispatch registry, the
/// model sink and the action slots. It is not `Send`; all dispatch
/// happens on the thread that drives it.
pub struct Session {
    /// The duplex byte stream to the driver; dropped on teardown.
    stream: Option<Box<dyn Stream>>,
    /// Raw descriptor of the stream, when it has one to poll.
    #[cfg(unix)]
    fd: Option<RawFd>,
    /// Connection lifecycle state.
    state: ConnState,
    /// Serial assigned to the next outgoing message.
    next_serial: u32,
    /// Reply and event correlation tables.
    registry: Registry,
    /// Consumer of everything the callbacks produce.
    model: Box<dyn Model>,
    /// De-duplication slots for current-target actions.
    pub(crate) view: ViewSlots,
    /// Host and actual port of the peer, when connected over TCP.
    peer: Option<(String, u16)>,
}

impl Session {
    /// Connects to a driver, scanning up from `first_port`.
    ///
    /// On success the session is `Connected` with the stock event
    /// handlers registered and an empty reply table.
    pub fn connect(host: &str, first_port: u16, model: Box<dyn Model>) -> Result<Self> {
        let (stream, port) = connect::connect(host, first_port)?;
        #[cfg(unix)]
        let fd = Some(stream.as_raw_fd());
        let mut session = Self::new(Box::new(stream), model);
        #[cfg(unix)]
        {
            session.fd = fd;
        }
        session.peer = Some((host.to_owned(), port));
        session.init();
        Ok(session)
    }

    /// Wraps an already-open stream (a Unix socket, an in-memory pipe).
    ///
    /// The standalone [`Session::run`] loop needs a pollable descriptor
    /// and is unavailable for streams without one; drive such sessions
    /// with [`Session::pump`] instead.
    pub fn over_stream(stream: Box<dyn Stream>, model: Box<dyn Model>) -> Self {
        let mut session = Self::new(stream, model);
        session.init();
        session
    }

    /// Builds the session in `Connecting` state.
    fn new(stream: Box<dyn Stream>, model: Box<dyn Model>) -> Self {
        Self {
            stream: Some(stream),
            #[cfg(unix)]
            fd: None,
            state: ConnState::Connecting,
            next_serial: 1,
            registry: Registry::default(),
            model,
            view: ViewSlots::default(),
            peer: None,
        }
    }

    /// Registers the stock event handlers and goes `Connected`.
    fn init(&mut self) {
        context::watch_draw_blocked(self);
        self.state = ConnState::Connected;
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Host and actual port of the peer, when connected over TCP.
    pub fn peer(&self) -> Option<(&str, u16)> {
        self.peer.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    /// The model sink, for dispatch callbacks.
    pub fn model(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    /// Number of requests still waiting for their reply.
    pub fn pending_replies(&self) -> usize {
        self.registry.reply_count()
    }

    /// Sends a message and returns the serial assigned to it.
    ///
    /// Every outgoing message consumes a serial; the serial sequence is
    /// strictly increasing in send order, which the drain relies on.
    pub fn send(&mut self, msg: &Message) -> Result<u32> {
        self.check_connected()?;
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;
        if let Err(e) = rbug_proto::encode(stream, msg) {
            warn!(error = %e, "send failed, closing session");
            self.shutdown();
            return Err(Error::Disconnected);
        }
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        trace!(serial, opcode = msg.opcode(), "sent");
        Ok(serial)
    }

    /// Registers a one-shot reply callback for a request serial.
    ///
    /// # Panics
    ///
    /// Panics if the serial already has a waiter (serial uniqueness is
    /// a hard invariant of the send path).
    pub fn register_reply(&mut self, serial: u32, handler: Box<dyn ReplyHandler>) {
        self.registry.register_reply(serial, handler);
    }

    /// Registers (or replaces) the handler for an event opcode.
    pub fn register_event(&mut self, op: i32, handler: Box<dyn EventHandler>) {
        self.registry.register_event(op, handler);
    }

    /// Reads and dispatches exactly one message.
    ///
    /// Called by the owning reactor when the socket is readable. A
    /// codec failure (including EOF) tears the session down and returns
    /// [`Error::Disconnected`].
    pub fn pump(&mut self) -> Result<()> {
        self.check_connected()?;
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;
        match rbug_proto::decode(stream) {
            Ok(msg) => {
                self.dispatch(msg);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "receive failed, closing session");
                self.shutdown();
                Err(Error::Disconnected)
            }
        }
    }

    /// Routes one message to its registered callback.
    ///
    /// Replies are one-shot: the entry is removed before the callback
    /// runs, so the callback can re-register under a new serial. A
    /// reply with no waiter is dropped quietly; a cancelled-while-
    /// pending action legitimately produces one.
    ///
    /// Event handlers are invoked through a shared handle and their
    /// table entry stays live while they run, so an event of the same
    /// opcode arriving via a nested drain is delivered normally.
    fn dispatch(&mut self, msg: Message) {
        if let Some(serial) = msg.reply_serial() {
            match self.registry.take_reply(serial) {
                Some(handler) => {
                    trace!(serial, opcode = msg.opcode(), "dispatching reply");
                    handler.on_reply(self, msg);
                }
                None => debug!(serial, "reply without a registered waiter, dropping"),
            }
        } else {
            let op = msg.opcode();
            match self.registry.event(op) {
                Some(handler) => {
                    trace!(opcode = op, "dispatching event");
                    if handler.on_event(self, &msg) == EventDisposition::Remove {
                        self.registry.remove_event_if(op, &handler);
                    }
                }
                None => debug!(opcode = op, "event without a registered handler, dropping"),
            }
        }
    }

    /// Blocks until all requests sent so far have been answered.
    ///
    /// Sends a ping and dispatches every message normally until the
    /// ping's own reply surfaces; that reply is discarded. Callable
    /// from inside a dispatch callback — the drain drives the same
    /// dispatch loop reentrantly.
    ///
    /// A reply with a serial *greater* than the ping's arriving before
    /// it means the stream lost or reordered a message. The drain
    /// aborts with [`Error::Protocol`] and leaves the session
    /// connected; the waiter it bypassed stays registered and is
    /// served if its reply ever arrives.
    ///
    /// If a dispatched callback tears the session down, the drain stops
    /// immediately with [`Error::Disconnected`] instead of reading from
    /// a dead connection.
    pub fn finish_and_emit_events(&mut self) -> Result<()> {
        self.check_connected()?;
        let ping = self.send(&Message::Ping)?;
        loop {
            let decoded = match self.stream.as_mut() {
                Some(stream) => rbug_proto::decode(stream),
                None => return Err(Error::Disconnected),
            };
            let msg = match decoded {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "connection failed while draining");
                    self.shutdown();
                    return Err(Error::Disconnected);
                }
            };
            if let Some(serial) = msg.reply_serial() {
                if serial == ping {
                    if !matches!(msg, Message::PingReply { .. }) {
                        warn!(
                            opcode = msg.opcode(),
                            "drain sentinel answered with unexpected opcode"
                        );
                    }
                    return Ok(());
                }
                if serial > ping {
                    error!(serial, ping, "reply overtook the drain sentinel");
                    return Err(Error::Protocol(format!(
                        "reply serial {serial} overtook drain sentinel {ping}"
                    )));
                }
            }
            self.dispatch(msg);
            if self.state != ConnState::Connected {
                return Err(Error::Disconnected);
            }
        }
    }

    /// Repeatedly drains until no reply registration is outstanding.
    ///
    /// Fan-out actions issue new requests while earlier replies
    /// dispatch, so one drain is not enough to settle a full listing.
    pub fn settle(&mut self) -> Result<()> {
        while self.pending_replies() > 0 {
            self.finish_and_emit_events()?;
        }
        Ok(())
    }

    /// Rebuilds the object tree from scratch.
    ///
    /// Clears the model, adds the screen root and starts the context
    /// and texture listings (which fan out into per-object actions).
    pub fn refresh(&mut self) -> Result<()> {
        self.check_connected()?;
        self.model.clear();
        let root = self.model.add_node(None, ObjectKind::Screen, 0);
        context::list_contexts(self, root)?;
        texture::list_textures(self, root)?;
        Ok(())
    }

    /// Polls the socket for readability or hangup.
    #[cfg(unix)]
    pub fn wait_readable(&self, timeout_ms: i32) -> Result<Readiness> {
        let fd = self.pollable_fd()?;
        Ok(poll::wait(fd, timeout_ms)?)
    }

    /// Raw descriptor for integration with an external reactor, when
    /// the underlying stream has one.
    #[cfg(unix)]
    pub fn poll_fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Pump-until-closed loop for consumers without their own reactor.
    #[cfg(unix)]
    pub fn run(&mut self) -> Result<()> {
        while self.state == ConnState::Connected {
            let ready = self.wait_readable(-1)?;
            if ready.readable && self.pump().is_err() {
                break;
            }
            if ready.closed {
                self.shutdown();
                break;
            }
        }
        Ok(())
    }

    /// Closes the session, dropping the stream, releasing both tables
    /// and notifying the model. Idempotent.
    pub fn close(&mut self) {
        self.shutdown();
    }

    /// The teardown path shared by explicit close and codec failure.
    pub(crate) fn shutdown(&mut self) {
        if matches!(self.state, ConnState::Closing | ConnState::Closed) {
            return;
        }
        self.state = ConnState::Closing;
        self.stream = None;
        #[cfg(unix)]
        {
            self.fd = None;
        }
        self.view.reset();
        self.registry.clear();
        self.model.connection_lost();
        self.state = ConnState::Closed;
    }

    /// Guards the operations that require a live connection.
    fn check_connected(&self) -> Result<()> {
        if self.state == ConnState::Connected {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    /// Descriptor lookup for the poll-based entry points.
    #[cfg(unix)]
    fn pollable_fd(&self) -> Result<RawFd> {
        self.fd.ok_or_else(|| {
            Error::Protocol("session stream has no pollable descriptor".to_owned())
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("next_serial", &self.next_serial)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
