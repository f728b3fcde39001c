//! Context listing, draw-call blocking controls and the draw-blocked
//! event watch.

use rbug_proto::{Message, opcode};
use tracing::warn;

use crate::error::Result;
use crate::model::{NodeId, ObjectKind};
use crate::registry::{EventDisposition, EventHandler, ReplyHandler};
use crate::session::Session;
use crate::shader;

/// Starts the context listing under `parent`.
///
/// The reply adds one node per context and fans out a shader listing
/// for each.
pub fn list_contexts(session: &mut Session, parent: NodeId) -> Result<()> {
    let serial = session.send(&Message::ContextList)?;
    session.register_reply(serial, Box::new(ListReply { parent }));
    Ok(())
}

/// Installs a draw-call block on a context and waits for the ack.
pub fn draw_block(session: &mut Session, context: u64, mask: u32) -> Result<()> {
    session.send(&Message::ContextDrawBlock { context, mask })?;
    session.finish_and_emit_events()
}

/// Steps a blocked context past the current draw call.
pub fn draw_step(session: &mut Session, context: u64, mask: u32) -> Result<()> {
    session.send(&Message::ContextDrawStep { context, mask })?;
    session.finish_and_emit_events()
}

/// Removes a draw-call block from a context.
pub fn draw_unblock(session: &mut Session, context: u64, mask: u32) -> Result<()> {
    session.send(&Message::ContextDrawUnblock { context, mask })?;
    session.finish_and_emit_events()
}

/// Flushes a context's queued commands.
pub fn flush(session: &mut Session, context: u64) -> Result<()> {
    session.send(&Message::ContextFlush { context })?;
    session.finish_and_emit_events()
}

/// Registers the persistent draw-blocked watch, forwarding each
/// notification to [`crate::Model::draw_blocked`].
pub fn watch_draw_blocked(session: &mut Session) {
    session.register_event(opcode::CONTEXT_DRAW_BLOCKED, Box::new(DrawBlockedWatch));
}

/// Fan-out point: one node and one shader listing per context.
struct ListReply {
    /// Node the context nodes are added under.
    parent: NodeId,
}

impl ReplyHandler for ListReply {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Message::ContextListReply { contexts, .. } = msg else {
            warn!(opcode = msg.opcode(), "unexpected reply to a context listing");
            return;
        };
        for context in contexts {
            let node = session
                .model()
                .add_node(Some(self.parent), ObjectKind::Context, context);
            if let Err(e) = shader::list_shaders(session, context, node) {
                warn!(error = %e, context, "shader listing failed to start");
                return;
            }
        }
    }
}

/// Forwards draw-blocked notifications for the connection's lifetime.
struct DrawBlockedWatch;

impl EventHandler for DrawBlockedWatch {
    fn on_event(&self, session: &mut Session, msg: &Message) -> EventDisposition {
        if let Message::ContextDrawBlocked { context, mask } = *msg {
            session.model().draw_blocked(context, mask);
        }
        EventDisposition::Keep
    }
}

#[cfg(test)]
mod tests {
    use rbug_proto::DRAW_BLOCK_BEFORE;

    use super::*;
    use crate::testutil::scripted_session;

    #[test]
    fn listing_fans_out_shader_listings() {
        let (mut session, wire, log) = scripted_session();
        let root = session.model().add_node(None, ObjectKind::Screen, 0);

        list_contexts(&mut session, root).unwrap();
        assert_eq!(wire.sent(), vec![Message::ContextList]);

        wire.push(&Message::ContextListReply {
            serial: 1,
            contexts: vec![7, 8],
        });
        session.pump().unwrap();

        assert_eq!(
            wire.sent(),
            vec![
                Message::ShaderList { context: 7 },
                Message::ShaderList { context: 8 },
            ]
        );
        let log = log.borrow();
        assert_eq!(log.nodes[1], (Some(root), ObjectKind::Context, 7));
        assert_eq!(log.nodes[2], (Some(root), ObjectKind::Context, 8));
    }

    #[test]
    fn draw_blocked_events_reach_the_model_repeatedly() {
        // The stock watch is installed by the session itself.
        let (mut session, wire, log) = scripted_session();

        for _ in 0..2 {
            wire.push(&Message::ContextDrawBlocked {
                context: 7,
                mask: DRAW_BLOCK_BEFORE,
            });
            session.pump().unwrap();
        }
        assert_eq!(log.borrow().blocks, vec![(7, DRAW_BLOCK_BEFORE); 2]);
    }

    #[test]
    fn draw_step_waits_for_the_ack() {
        let (mut session, wire, _log) = scripted_session();

        // Step takes serial 1, the drain ping serial 2; the step's ack
        // is dropped as an orphan before the sentinel lands.
        wire.push(&Message::ErrorReply { serial: 1, error: 0 });
        wire.push(&Message::PingReply { serial: 2 });

        draw_step(&mut session, 7, DRAW_BLOCK_BEFORE).unwrap();
        assert_eq!(
            wire.sent(),
            vec![
                Message::ContextDrawStep {
                    context: 7,
                    mask: DRAW_BLOCK_BEFORE,
                },
                Message::Ping,
            ]
        );
        assert_eq!(session.pending_replies(), 0);
    }
}
