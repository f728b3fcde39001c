//! In-memory wiring for dispatch tests.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use rbug_proto::{Message, TextureInfo};

use crate::model::{Model, NodeId, ObjectKind, ShaderState, TextureData};
use crate::session::Session;

/// Shared in-memory duplex stream.
///
/// Messages pushed with [`TestWire::push`] become the session's scripted
/// input; bytes the session writes accumulate and can be decoded back
/// with [`TestWire::sent`]. Reading past the scripted input reports EOF,
/// which the session treats as a lost connection.
#[derive(Clone, Default)]
pub(crate) struct TestWire {
    /// Buffers shared between the session's handle and the test's.
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Scripted bytes the session will read.
    incoming: Vec<u8>,
    /// Read position within `incoming`.
    pos: usize,
    /// Bytes the session has written.
    sent: Vec<u8>,
}

impl TestWire {
    /// Appends a message to the session's input.
    pub(crate) fn push(&self, msg: &Message) {
        let inner = &mut *self.inner.borrow_mut();
        rbug_proto::encode(&mut inner.incoming, msg).unwrap();
    }

    /// Decodes and drains everything the session has sent so far.
    pub(crate) fn sent(&self) -> Vec<Message> {
        let data = std::mem::take(&mut self.inner.borrow_mut().sent);
        let mut cursor = &data[..];
        let mut msgs = Vec::new();
        while !cursor.is_empty() {
            msgs.push(rbug_proto::decode(&mut cursor).unwrap());
        }
        msgs
    }
}

impl Read for TestWire {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = &mut *self.inner.borrow_mut();
        let remaining = &inner.incoming[inner.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        inner.pos += n;
        Ok(n)
    }
}

impl Write for TestWire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Everything a [`LogModel`] has been told, for assertions.
#[derive(Default)]
pub(crate) struct ModelLog {
    /// Arguments of every `add_node` call, in order.
    pub(crate) nodes: Vec<(Option<NodeId>, ObjectKind, u64)>,
    /// Number of `clear` calls.
    pub(crate) cleared: u32,
    /// Texture metadata updates.
    pub(crate) infos: Vec<(NodeId, TextureInfo)>,
    /// Texel data deliveries.
    pub(crate) data: Vec<(NodeId, TextureData)>,
    /// Shader state updates.
    pub(crate) shaders: Vec<(NodeId, ShaderState)>,
    /// Draw-blocked notifications as (context, mask).
    pub(crate) blocks: Vec<(u64, u32)>,
    /// Number of `connection_lost` calls.
    pub(crate) lost: u32,
}

/// Model that records every call into a shared [`ModelLog`].
pub(crate) struct LogModel {
    /// Shared record the tests assert against.
    log: Rc<RefCell<ModelLog>>,
}

impl Model for LogModel {
    fn clear(&mut self) {
        self.log.borrow_mut().cleared += 1;
    }

    fn add_node(&mut self, parent: Option<NodeId>, kind: ObjectKind, object: u64) -> NodeId {
        let mut log = self.log.borrow_mut();
        let id = NodeId(log.nodes.len() as u64);
        log.nodes.push((parent, kind, object));
        id
    }

    fn texture_info(&mut self, node: NodeId, info: &TextureInfo) {
        self.log.borrow_mut().infos.push((node, *info));
    }

    fn texture_data(&mut self, node: NodeId, data: &TextureData) {
        self.log.borrow_mut().data.push((node, data.clone()));
    }

    fn shader_info(&mut self, node: NodeId, state: &ShaderState) {
        self.log.borrow_mut().shaders.push((node, state.clone()));
    }

    fn draw_blocked(&mut self, context: u64, mask: u32) {
        self.log.borrow_mut().blocks.push((context, mask));
    }

    fn connection_lost(&mut self) {
        self.log.borrow_mut().lost += 1;
    }
}

/// Session over a [`TestWire`] with a recording model.
pub(crate) fn scripted_session() -> (Session, TestWire, Rc<RefCell<ModelLog>>) {
    let wire = TestWire::default();
    let log = Rc::new(RefCell::new(ModelLog::default()));
    let session = Session::over_stream(
        Box::new(wire.clone()),
        Box::new(LogModel {
            log: Rc::clone(&log),
        }),
    );
    (session, wire, log)
}
