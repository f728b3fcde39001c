//! Shader listing, describing and the disable/replace controls.
//!
//! The listing fans out one describe per shader. The viewed shader's
//! describe occupies a session slot so re-selecting the same shader is
//! a no-op and switching shaders cancels the stale describe. Controls
//! bracket their fire-and-forget request between two drains and then
//! refresh the shader with a fresh describe.

use std::cell::RefCell;
use std::rc::Rc;

use rbug_proto::Message;
use tracing::{debug, warn};

use crate::action::Lifecycle;
use crate::error::Result;
use crate::model::{NodeId, ObjectKind, ShaderState};
use crate::registry::ReplyHandler;
use crate::session::Session;

/// Shared handle to an in-flight shader describe.
pub(crate) type InfoAction = Rc<RefCell<InfoState>>;

/// State of a single-step shader describe.
pub(crate) struct InfoState {
    /// Deferred-destruction state; checked before the model update.
    pub(crate) life: Lifecycle,
    /// Tree node receiving the result.
    node: NodeId,
    /// Owning context id.
    context: u64,
    /// Server-side shader id.
    shader: u64,
}

fn start_action(session: &mut Session, action: InfoAction) -> Result<()> {
    let (context, shader) = {
        let state = action.borrow();
        (state.context, state.shader)
    };
    let serial = session.send(&Message::ShaderInfo { context, shader })?;
    session.register_reply(serial, Box::new(InfoReply { action }));
    Ok(())
}

fn new_action(node: NodeId, context: u64, shader: u64) -> InfoAction {
    Rc::new(RefCell::new(InfoState {
        life: Lifecycle::Active,
        node,
        context,
        shader,
    }))
}

/// Starts the shader listing for `context` under `parent`.
///
/// The reply adds one node per shader and fans out a describe for each.
pub fn list_shaders(session: &mut Session, context: u64, parent: NodeId) -> Result<()> {
    let serial = session.send(&Message::ShaderList { context })?;
    session.register_reply(serial, Box::new(ListReply { context, parent }));
    Ok(())
}

/// Describes one shader and updates its node.
pub fn start_info(session: &mut Session, node: NodeId, context: u64, shader: u64) -> Result<()> {
    start_action(session, new_action(node, context, shader))
}

/// Describes the shader the consumer is now viewing.
///
/// A describe already in flight for the same shader makes this a no-op;
/// one for a different shader is cancelled and replaced.
pub fn show(session: &mut Session, node: NodeId, context: u64, shader: u64) -> Result<()> {
    if let Some(current) = &session.view.shader {
        let state = current.borrow();
        if state.context == context && state.shader == shader && state.life.is_active() {
            debug!(context, shader, "describe already in flight");
            return Ok(());
        }
    }
    cancel_info(session);
    let action = new_action(node, context, shader);
    session.view.shader = Some(Rc::clone(&action));
    start_action(session, action)
}

/// Cancels the viewed shader's in-flight describe, if any.
pub fn cancel_info(session: &mut Session) {
    if let Some(action) = session.view.shader.take() {
        action.borrow_mut().life = Lifecycle::Cancelled;
    }
}

/// Disables or re-enables a shader, then refreshes its node.
///
/// The request itself gets no registered waiter; its ack surfaces as an
/// orphaned reply during the second drain and is dropped there.
pub fn set_disabled(
    session: &mut Session,
    node: NodeId,
    context: u64,
    shader: u64,
    disable: bool,
) -> Result<()> {
    session.finish_and_emit_events()?;
    session.send(&Message::ShaderDisable {
        context,
        shader,
        disable,
    })?;
    session.finish_and_emit_events()?;
    show(session, node, context, shader)
}

/// Installs a replacement token stream, then refreshes the node.
pub fn replace(
    session: &mut Session,
    node: NodeId,
    context: u64,
    shader: u64,
    tokens: Vec<u32>,
) -> Result<()> {
    session.finish_and_emit_events()?;
    session.send(&Message::ShaderReplace {
        context,
        shader,
        tokens,
    })?;
    session.finish_and_emit_events()?;
    show(session, node, context, shader)
}

/// Restores the original token stream, then refreshes the node.
pub fn revert(session: &mut Session, node: NodeId, context: u64, shader: u64) -> Result<()> {
    replace(session, node, context, shader, Vec::new())
}

/// Clears the view slot if it still points at `action`.
fn detach(session: &mut Session, action: &InfoAction) {
    if session
        .view
        .shader
        .as_ref()
        .is_some_and(|slot| Rc::ptr_eq(slot, action))
    {
        session.view.shader = None;
    }
}

/// Fan-out point: one node and one describe per listed shader.
struct ListReply {
    /// Context the shaders belong to.
    context: u64,
    /// Node the shader nodes are added under.
    parent: NodeId,
}

impl ReplyHandler for ListReply {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Message::ShaderListReply { shaders, .. } = msg else {
            warn!(opcode = msg.opcode(), "unexpected reply to a shader listing");
            return;
        };
        for shader in shaders {
            let node = session
                .model()
                .add_node(Some(self.parent), ObjectKind::Shader, shader);
            if let Err(e) = start_info(session, node, self.context, shader) {
                warn!(error = %e, shader, "shader describe failed to start");
                return;
            }
        }
    }
}

/// The describe's single reply.
struct InfoReply {
    /// Action this reply belongs to.
    action: InfoAction,
}

impl ReplyHandler for InfoReply {
    fn on_reply(self: Box<Self>, session: &mut Session, msg: Message) {
        let Self { action } = *self;
        let Message::ShaderInfoReply {
            original,
            replaced,
            disabled,
            ..
        } = msg
        else {
            debug!(opcode = msg.opcode(), "shader describe rejected");
            action.borrow_mut().life = Lifecycle::Done;
            detach(session, &action);
            return;
        };
        if !action.borrow().life.is_active() {
            return;
        }
        let node = action.borrow().node;
        session.model().shader_info(
            node,
            &ShaderState {
                original,
                replaced,
                disabled,
            },
        );
        action.borrow_mut().life = Lifecycle::Done;
        detach(session, &action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scripted_session;

    #[test]
    fn listing_fans_out_one_describe_per_shader() {
        let (mut session, wire, log) = scripted_session();
        let ctx_node = session.model().add_node(None, ObjectKind::Context, 1);

        list_shaders(&mut session, 1, ctx_node).unwrap();
        assert_eq!(wire.sent(), vec![Message::ShaderList { context: 1 }]);

        wire.push(&Message::ShaderListReply {
            serial: 1,
            shaders: vec![3, 4],
        });
        session.pump().unwrap();
        assert_eq!(
            wire.sent(),
            vec![
                Message::ShaderInfo {
                    context: 1,
                    shader: 3,
                },
                Message::ShaderInfo {
                    context: 1,
                    shader: 4,
                },
            ]
        );

        wire.push(&Message::ShaderInfoReply {
            serial: 2,
            original: vec![1, 2],
            replaced: vec![],
            disabled: false,
        });
        wire.push(&Message::ShaderInfoReply {
            serial: 3,
            original: vec![5],
            replaced: vec![6],
            disabled: true,
        });
        session.pump().unwrap();
        session.pump().unwrap();

        let log = log.borrow();
        assert_eq!(log.shaders.len(), 2);
        assert!(log.shaders[1].1.disabled);
        assert_eq!(log.shaders[1].1.replaced, vec![6]);
    }

    #[test]
    fn switching_the_viewed_shader_cancels_the_stale_describe() {
        let (mut session, wire, log) = scripted_session();
        let a = session.model().add_node(None, ObjectKind::Shader, 3);
        let b = session.model().add_node(None, ObjectKind::Shader, 4);

        show(&mut session, a, 1, 3).unwrap();
        show(&mut session, a, 1, 3).unwrap();
        show(&mut session, b, 1, 4).unwrap();
        // The repeat was a no-op, the switch sent a fresh describe.
        assert_eq!(
            wire.sent(),
            vec![
                Message::ShaderInfo {
                    context: 1,
                    shader: 3,
                },
                Message::ShaderInfo {
                    context: 1,
                    shader: 4,
                },
            ]
        );

        wire.push(&Message::ShaderInfoReply {
            serial: 1,
            original: vec![1],
            replaced: vec![],
            disabled: false,
        });
        wire.push(&Message::ShaderInfoReply {
            serial: 2,
            original: vec![2],
            replaced: vec![],
            disabled: false,
        });
        session.pump().unwrap();
        session.pump().unwrap();

        // Only the second describe updated the model.
        let log = log.borrow();
        assert_eq!(log.shaders.len(), 1);
        assert_eq!(log.shaders[0].0, b);
        assert!(session.view.shader.is_none());
    }

    #[test]
    fn disable_brackets_the_request_between_drains_and_refreshes() {
        let (mut session, wire, log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Shader, 3);

        // First drain pings with serial 1, the control takes serial 2,
        // the second drain pings with serial 3, the refresh describe
        // takes serial 4. The control's ack (serial 2) lands during the
        // second drain with no waiter and is dropped.
        wire.push(&Message::PingReply { serial: 1 });
        wire.push(&Message::ErrorReply { serial: 2, error: 0 });
        wire.push(&Message::PingReply { serial: 3 });

        set_disabled(&mut session, node, 1, 3, true).unwrap();
        assert_eq!(
            wire.sent(),
            vec![
                Message::Ping,
                Message::ShaderDisable {
                    context: 1,
                    shader: 3,
                    disable: true,
                },
                Message::Ping,
                Message::ShaderInfo {
                    context: 1,
                    shader: 3,
                },
            ]
        );

        wire.push(&Message::ShaderInfoReply {
            serial: 4,
            original: vec![1],
            replaced: vec![],
            disabled: true,
        });
        session.pump().unwrap();

        let log = log.borrow();
        assert_eq!(log.shaders.len(), 1);
        assert!(log.shaders[0].1.disabled);
        assert!(session.view.shader.is_none());
    }

    #[test]
    fn revert_sends_an_empty_token_stream() {
        let (mut session, wire, _log) = scripted_session();
        let node = session.model().add_node(None, ObjectKind::Shader, 3);

        wire.push(&Message::PingReply { serial: 1 });
        wire.push(&Message::PingReply { serial: 3 });

        revert(&mut session, node, 1, 3).unwrap();
        let sent = wire.sent();
        assert_eq!(
            sent[1],
            Message::ShaderReplace {
                context: 1,
                shader: 3,
                tokens: vec![],
            }
        );
    }
}
