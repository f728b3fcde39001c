//! Result sink fed by dispatch callbacks.
//!
//! The presentation layer (tree view, CLI printer, test recorder)
//! implements [`Model`]; the dispatch and action code only ever talks
//! to this trait and never interprets the [`NodeId`]s it hands back.

use rbug_proto::TextureInfo;

/// Opaque position in the consumer's display tree.
///
/// Minted by the [`Model`] from [`Model::add_node`]; the core threads
/// it through actions untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Kind of server-side object a tree node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// The root screen object.
    Screen,
    /// A rendering context.
    Context,
    /// A texture resource.
    Texture,
    /// A shader bound to a context.
    Shader,
}

/// Raw texel data read back from a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Bytes per block row in `data`.
    pub stride: u32,
    /// Texel bytes, at least `blocks_y * stride` long.
    pub data: Vec<u8>,
}

/// Current server-side state of a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderState {
    /// Original token stream.
    pub original: Vec<u32>,
    /// Replacement token stream, empty if none is installed.
    pub replaced: Vec<u32>,
    /// Whether the shader is currently disabled.
    pub disabled: bool,
}

/// Consumer of the data the dispatch engine produces.
///
/// All methods are called from dispatch callbacks on the session's
/// thread; implementations must not call back into the session.
pub trait Model {
    /// Drops all nodes; called when a full refresh starts.
    fn clear(&mut self);

    /// Adds a placeholder node for a server-side object and returns its
    /// position token.
    fn add_node(&mut self, parent: Option<NodeId>, kind: ObjectKind, object: u64) -> NodeId;

    /// Updates a texture node with its shape metadata.
    fn texture_info(&mut self, node: NodeId, info: &TextureInfo);

    /// Delivers validated texel data for a texture node.
    fn texture_data(&mut self, node: NodeId, data: &TextureData);

    /// Updates a shader node with its current server-side state.
    fn shader_info(&mut self, node: NodeId, state: &ShaderState);

    /// A context hit a draw-call block.
    fn draw_blocked(&mut self, context: u64, mask: u32);

    /// The connection is gone; no further calls will be made.
    fn connection_lost(&mut self);
}
