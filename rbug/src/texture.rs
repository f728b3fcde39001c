//! Texture listing, describing and pixel read-back.
//!
//! The listing fans out one describe per texture to fill the tree. A
//! pixel download is the two-step chain describe → read, started only
//! for the texture the consumer is currently viewing; the session's
//! view slot de-duplicates and cancels these.

use std::cell::RefCell;
use std::rc::Rc;

use rbug_proto::Message;
use tracing::{debug, error, warn};

use crate::action::Lifecycle;
use crate::error::Result;
use crate::model::{NodeId, ObjectKind, TextureData};
use crate::registry::ReplyHandler;
use crate::session::Session;

/// Shared handle to an in-flight texture action.
pub(crate) type ReadAction = Rc<RefCell<ReadState>>;

/// State threaded through the describe → read chain.
pub(crate) struct ReadState {
    /// Deferred-destruction state; checked before every model update.
    pub(crate) life: Lifecycle,
    /// Tree node receiving the results.
    node: NodeId,
    /// Server-side texture id.
    texture: u64,
    /// Shape from the describe step, needed to validate the read step.
    info: Option<rbug_proto::TextureInfo>,
}

fn new_action(node: NodeId, texture: u64) -> ReadAction {
    Rc::new(RefCell::new(ReadState {
        life: Lifecycle::Active,
        node,
        texture,
        info: None,
    }))
}

/// Sends the describe step and suspends the action on its reply.
fn start_action(session: &mut Session, action: ReadAction) -> Result<()> {
    let texture = action.borrow().texture;
    let serial = session.send(&Message::TextureInfo { texture })?;
    session.register_reply(serial, Box::new(InfoStep { action }));
    Ok(())
}

/// Starts the texture listing under `parent`.
///
/// The reply adds one node per texture and fans out a describe for each.
pub fn list_textures(session: &mut Session, parent: NodeId) -> Result<()> {
    let serial = session.send(&Message::TextureList)?;
    session.register_reply(serial, Box::new(ListReply { parent }));
    Ok(())
}

/// Describes one texture and updates its node; no pixel read-back.
pub fn start_info(session: &mut Session, node: NodeId, texture: u64) -> Result<()> {
    start_info_action(session, node, texture).map(|_| ())
}

/// As [`start_info`], handing back the action for cancellation.
pub(crate) fn start_info_action(
    session: &mut Session,
    node: NodeId,
    texture: u64,
) -> Result<ReadAction> {
    let action = new_action(node, texture);
    start_action(session, Rc::clone(&action))?;
    Ok(action)
}

/// Starts a pixel download for the viewed texture.
///
/// A download already in flight for the same texture makes this a
/// no-op; one for a different texture is cancelled and replaced.
pub fn start_read(session: &mut Session, node: NodeId, texture: u64) -> Result<()> {
    if let Some(current) = &session.view.read {
        let state = current.borrow();
        if state.texture == texture && state.life.is_active() {
            debug!(texture, "download already in flight");
            return Ok(());
        }
    }
    cancel_read(session);
    let action = new_action(node, texture);
    session.view.read = Some(Rc::clone(&action));
    start_action(session, action)
}

/// Cancels the in-flight pixel download, if any.
///
/// The action's registry entry stays until its reply arrives; the
/// reply is then discarded without touching the model.
pub fn cancel_read(session: &mut Session) {
    if let Some(action) = session.view.read.take() {
        action.borrow_mut().life = Lifecycle::Cancelled;
    }
}

/// Clears the view slot if it still points at `action`.
fn detach(session: &mut Session, action: &ReadAction) {
    if session
        .view
        .read
        .as_ref()
        .is_some_and(|slot| Rc::ptr_eq(slot, action))
    {
        session.view.read = None;
    }
}

/// Fan-out point: one node and one describe per listed texture.
struct ListReply {
    /// Node the texture nodes are added under.
    parent: NodeId,
}

impl ReplyHandler for ListReply {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Message::TextureListReply { textures, .. } = msg else {
            warn!(opcode = msg.opcode(), "unexpected reply to a texture listing");
            return;
        };
        for texture in textures {
            let node = session
                .model()
                .add_node(Some(self.parent), ObjectKind::Texture, texture);
            if let Err(e) = start_info(session, node, texture) {
                warn!(error = %e, texture, "texture describe failed to start");
                return;
            }
        }
    }
}

/// First step of the chain: shape metadata.
struct InfoStep {
    /// Action this reply belongs to.
    action: ReadAction,
}

impl ReplyHandler for InfoStep {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Self { action } = *self;
        let Message::TextureInfoReply { info, .. } = msg else {
            debug!(opcode = msg.opcode(), "texture describe rejected");
            action.borrow_mut().life = Lifecycle::Done;
            detach(session, &action);
            return;
        };
        if !action.borrow().life.is_active() {
            return;
        }
        let node = {
            let mut state = action.borrow_mut();
            state.info = Some(info);
            state.node
        };
        session.model().texture_info(node, &info);

        // Only the slotted action continues into the pixel read; the
        // listing's fan-out describes end here.
        let slotted = session
            .view
            .read
            .as_ref()
            .is_some_and(|slot| Rc::ptr_eq(slot, &action));
        if !slotted {
            action.borrow_mut().life = Lifecycle::Done;
            return;
        }
        let read = {
            let state = action.borrow();
            Message::TextureRead {
                texture: state.texture,
                face: 0,
                level: 0,
                zslice: 0,
                x: 0,
                y: 0,
                w: info.width,
                h: info.height,
            }
        };
        match session.send(&read) {
            Ok(serial) => session.register_reply(serial, Box::new(ReadStep { action })),
            Err(e) => warn!(error = %e, "pixel read failed to start"),
        }
    }
}

/// Second step of the chain: texel bytes.
struct ReadStep {
    /// Action this reply belongs to.
    action: ReadAction,
}

impl ReplyHandler for ReadStep {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Self { action } = *self;
        let Message::TextureReadReply { stride, data, .. } = msg else {
            debug!(opcode = msg.opcode(), "pixel read rejected");
            action.borrow_mut().life = Lifecycle::Done;
            detach(session, &action);
            return;
        };
        if !action.borrow().life.is_active() {
            return;
        }
        let (node, info) = {
            let state = action.borrow();
            (state.node, state.info)
        };
        // The describe step ran first by construction.
        if let Some(info) = info {
            let need = u64::from(info.blocks_y()) * u64::from(stride);
            if (data.len() as u64) < need {
                error!(
                    got = data.len(),
                    need, "pixel read returned short data, discarding"
                );
            } else {
                session.model().texture_data(node, &TextureData { stride, data });
            }
        }
        action.borrow_mut().life = Lifecycle::Done;
        detach(session, &action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scripted_session;
    use rbug_proto::TextureInfo;

    fn flat_info() -> TextureInfo {
        TextureInfo {
            width: 4,
            height: 4,
            depth: 1,
            format: 1,
            block_width: 1,
            block_height: 1,
            block_size: 4,
            last_level: 0,
        }
    }

    #[test]
    fn listing_fans_out_one_describe_per_texture() {
        let (mut session, wire, log) = scripted_session();
        let root = session.model().add_node(None, ObjectKind::Screen, 0);

        list_textures(&mut session, root).unwrap();
        let sent = wire.sent();
        assert_eq!(sent, vec![Message::TextureList]);

        wire.push(&Message::TextureListReply {
            serial: 1,
            textures: vec![10, 11],
        });
        session.pump().unwrap();

        assert_eq!(
            wire.sent(),
            vec![
                Message::TextureInfo { texture: 10 },
                Message::TextureInfo { texture: 11 },
            ]
        );

        wire.push(&Message::TextureInfoReply {
            serial: 2,
            info: flat_info(),
        });
        wire.push(&Message::TextureInfoReply {
            serial: 3,
            info: flat_info(),
        });
        session.pump().unwrap();
        session.pump().unwrap();

        assert_eq!(log.borrow().infos.len(), 2);
        // Fan-out describes never chain into a pixel read.
        assert_eq!(wire.sent(), vec![]);
        assert_eq!(session.pending_replies(), 0);
    }

    #[test]
    fn duplicate_download_is_a_no_op() {
        let (mut session, wire, _log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Texture, 10);

        start_read(&mut session, node, 10).unwrap();
        assert_eq!(wire.sent(), vec![Message::TextureInfo { texture: 10 }]);

        start_read(&mut session, node, 10).unwrap();
        assert_eq!(wire.sent(), vec![]);
        assert_eq!(session.pending_replies(), 1);
    }

    #[test]
    fn retarget_cancels_the_old_download() {
        let (mut session, wire, log) = scripted_session();
        let a = session.model().add_node(None, ObjectKind::Texture, 10);
        let b = session.model().add_node(None, ObjectKind::Texture, 11);

        start_read(&mut session, a, 10).unwrap();
        start_read(&mut session, b, 11).unwrap();
        assert_eq!(
            wire.sent(),
            vec![
                Message::TextureInfo { texture: 10 },
                Message::TextureInfo { texture: 11 },
            ]
        );

        // The first describe lands after the cancel: no model update,
        // no chained read.
        wire.push(&Message::TextureInfoReply {
            serial: 1,
            info: flat_info(),
        });
        session.pump().unwrap();
        assert_eq!(log.borrow().infos.len(), 0);
        assert_eq!(wire.sent(), vec![]);

        // The second one proceeds into its read step.
        wire.push(&Message::TextureInfoReply {
            serial: 2,
            info: flat_info(),
        });
        session.pump().unwrap();
        assert_eq!(log.borrow().infos.len(), 1);
        assert_eq!(
            wire.sent(),
            vec![Message::TextureRead {
                texture: 11,
                face: 0,
                level: 0,
                zslice: 0,
                x: 0,
                y: 0,
                w: 4,
                h: 4,
            }]
        );

        wire.push(&Message::TextureReadReply {
            serial: 3,
            stride: 16,
            data: vec![0xab; 64],
        });
        session.pump().unwrap();
        assert_eq!(log.borrow().data.len(), 1);
        assert!(session.view.read.is_none());
    }

    #[test]
    fn cancelled_action_is_released_exactly_once() {
        let (mut session, wire, log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Texture, 10);

        start_read(&mut session, node, 10).unwrap();
        let action = Rc::clone(session.view.read.as_ref().unwrap());
        // Slot, registry callback and this test hold the handles.
        assert_eq!(Rc::strong_count(&action), 3);

        cancel_read(&mut session);
        assert!(session.view.read.is_none());
        assert_eq!(Rc::strong_count(&action), 2);

        wire.push(&Message::TextureInfoReply {
            serial: 1,
            info: flat_info(),
        });
        session.pump().unwrap();

        // The callback discarded the reply and dropped its handle.
        assert_eq!(log.borrow().infos.len(), 0);
        assert_eq!(Rc::strong_count(&action), 1);
        assert_eq!(action.borrow().life, Lifecycle::Cancelled);
    }

    #[test]
    fn cancelling_one_of_three_describes_skips_only_its_update() {
        let (mut session, wire, log) = scripted_session();
        let root = session.model().add_node(None, ObjectKind::Screen, 0);

        let mut actions = Vec::new();
        for texture in [10, 11, 12] {
            let node = session
                .model()
                .add_node(Some(root), ObjectKind::Texture, texture);
            actions.push(start_info_action(&mut session, node, texture).unwrap());
        }
        assert_eq!(wire.sent().len(), 3);

        actions[1].borrow_mut().life = Lifecycle::Cancelled;

        for serial in 1..=3 {
            wire.push(&Message::TextureInfoReply {
                serial,
                info: flat_info(),
            });
            session.pump().unwrap();
        }

        // Updates landed for #1 and #3 only; #2's reply was discarded
        // and its state released with the callback.
        let log = log.borrow();
        assert_eq!(log.infos.len(), 2);
        assert_eq!(log.infos[0].0, NodeId(1));
        assert_eq!(log.infos[1].0, NodeId(3));
        drop(actions.remove(2));
        drop(actions.remove(0));
        let cancelled = actions.remove(0);
        assert_eq!(Rc::strong_count(&cancelled), 1);
    }

    #[test]
    fn short_pixel_data_is_discarded() {
        let (mut session, wire, log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Texture, 10);

        start_read(&mut session, node, 10).unwrap();
        wire.push(&Message::TextureInfoReply {
            serial: 1,
            info: flat_info(),
        });
        session.pump().unwrap();

        // 4 block rows at stride 16 need 64 bytes; send 10.
        wire.push(&Message::TextureReadReply {
            serial: 2,
            stride: 16,
            data: vec![0; 10],
        });
        session.pump().unwrap();

        assert_eq!(log.borrow().data.len(), 0);
        assert!(session.view.read.is_none());
        assert_eq!(session.state(), crate::session::ConnState::Connected);
    }

    #[test]
    fn error_reply_releases_the_download_slot() {
        let (mut session, wire, log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Texture, 10);

        start_read(&mut session, node, 10).unwrap();
        wire.push(&Message::ErrorReply { serial: 1, error: 2 });
        session.pump().unwrap();

        assert_eq!(log.borrow().infos.len(), 0);
        assert!(session.view.read.is_none());
        assert_eq!(session.pending_replies(), 0);
    }
}
