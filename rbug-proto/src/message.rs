//! Protocol message types for the debugger connection.

use std::io;

use crate::codec::{PayloadReader, PayloadWriter};

/// Block draw calls before they reach the pipeline.
pub const DRAW_BLOCK_BEFORE: u32 = 0x1;
/// Block draw calls after they have executed.
pub const DRAW_BLOCK_AFTER: u32 = 0x2;
/// Block draw calls matching the installed rule.
pub const DRAW_BLOCK_RULE: u32 = 0x4;

/// Message type tags.
///
/// Requests and events are non-negative; the reply to a request has the
/// negated opcode of the request, see [`reply`].
pub mod opcode {
    /// Sentinel request used by the synchronous drain.
    pub const PING: i32 = 0x0001;
    /// Generic failure reply to any request.
    pub const ERROR: i32 = 0x0002;

    /// List all live contexts.
    pub const CONTEXT_LIST: i32 = 0x0101;
    /// Install a draw-call block on a context.
    pub const CONTEXT_DRAW_BLOCK: i32 = 0x0102;
    /// Step a blocked context past the current draw call.
    pub const CONTEXT_DRAW_STEP: i32 = 0x0103;
    /// Remove a draw-call block from a context.
    pub const CONTEXT_DRAW_UNBLOCK: i32 = 0x0104;
    /// Event: a context hit a draw-call block.
    pub const CONTEXT_DRAW_BLOCKED: i32 = 0x0105;
    /// Flush a context's queued commands.
    pub const CONTEXT_FLUSH: i32 = 0x0106;

    /// List all live textures.
    pub const TEXTURE_LIST: i32 = 0x0201;
    /// Describe one texture.
    pub const TEXTURE_INFO: i32 = 0x0202;
    /// Read back a rectangle of texture data.
    pub const TEXTURE_READ: i32 = 0x0203;

    /// List the shaders bound to a context.
    pub const SHADER_LIST: i32 = 0x0301;
    /// Describe one shader.
    pub const SHADER_INFO: i32 = 0x0302;
    /// Disable or re-enable a shader.
    pub const SHADER_DISABLE: i32 = 0x0303;
    /// Replace a shader's token stream.
    pub const SHADER_REPLACE: i32 = 0x0304;

    /// The reply opcode for a request opcode.
    pub const fn reply(request: i32) -> i32 {
        -request
    }
}

/// Shape description of a texture, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Width of the base mip level in texels.
    pub width: u32,
    /// Height of the base mip level in texels.
    pub height: u32,
    /// Depth of the base mip level in texels.
    pub depth: u32,
    /// Pixel format identifier.
    pub format: u32,
    /// Compression block width in texels.
    pub block_width: u32,
    /// Compression block height in texels.
    pub block_height: u32,
    /// Bytes per compression block.
    pub block_size: u32,
    /// Index of the smallest mip level.
    pub last_level: u32,
}

impl TextureInfo {
    /// Number of block rows covering the texture height.
    ///
    /// `blocks_y * stride` is the byte size a full read-back must carry;
    /// anything shorter is a protocol error.
    pub fn blocks_y(&self) -> u32 {
        self.height.div_ceil(self.block_height.max(1))
    }
}

/// One wire message, request, reply or event.
///
/// Replies carry the serial number of the request they answer as their
/// first payload field; requests and events carry no serial (a request's
/// serial is its position in the connection's send sequence).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// Sentinel request; the reply carries no payload beyond the serial.
    Ping,
    /// List all live contexts.
    ContextList,
    /// Install a draw-call block (`DRAW_BLOCK_*` mask) on a context.
    ContextDrawBlock {
        /// Target context id.
        context: u64,
        /// `DRAW_BLOCK_*` bits to set.
        mask: u32,
    },
    /// Step a blocked context past the current draw call.
    ContextDrawStep {
        /// Target context id.
        context: u64,
        /// `DRAW_BLOCK_*` bits to step over.
        mask: u32,
    },
    /// Remove a draw-call block from a context.
    ContextDrawUnblock {
        /// Target context id.
        context: u64,
        /// `DRAW_BLOCK_*` bits to clear.
        mask: u32,
    },
    /// Flush a context's queued commands.
    ContextFlush {
        /// Target context id.
        context: u64,
    },
    /// List all live textures.
    TextureList,
    /// Describe one texture.
    TextureInfo {
        /// Target texture id.
        texture: u64,
    },
    /// Read back a rectangle of one mip level of a texture.
    TextureRead {
        /// Target texture id.
        texture: u64,
        /// Cube face index.
        face: u32,
        /// Mip level.
        level: u32,
        /// Depth slice.
        zslice: u32,
        /// Left edge of the rectangle in texels.
        x: u32,
        /// Top edge of the rectangle in texels.
        y: u32,
        /// Rectangle width in texels.
        w: u32,
        /// Rectangle height in texels.
        h: u32,
    },
    /// List the shaders bound to a context.
    ShaderList {
        /// Owning context id.
        context: u64,
    },
    /// Describe one shader.
    ShaderInfo {
        /// Owning context id.
        context: u64,
        /// Target shader id.
        shader: u64,
    },
    /// Disable or re-enable a shader.
    ShaderDisable {
        /// Owning context id.
        context: u64,
        /// Target shader id.
        shader: u64,
        /// `true` to disable, `false` to re-enable.
        disable: bool,
    },
    /// Replace a shader's token stream (empty tokens = revert).
    ShaderReplace {
        /// Owning context id.
        context: u64,
        /// Target shader id.
        shader: u64,
        /// New token stream, or empty to restore the original.
        tokens: Vec<u32>,
    },

    /// Event: a context hit a draw-call block.
    ContextDrawBlocked {
        /// Blocked context id.
        context: u64,
        /// `DRAW_BLOCK_*` bits that fired.
        mask: u32,
    },

    /// Reply to [`Message::Ping`].
    PingReply {
        /// Serial of the answered request.
        serial: u32,
    },
    /// Generic failure reply to any request.
    ErrorReply {
        /// Serial of the failed request.
        serial: u32,
        /// Server-defined error code.
        error: u32,
    },
    /// Reply to [`Message::ContextList`].
    ContextListReply {
        /// Serial of the answered request.
        serial: u32,
        /// Live context ids.
        contexts: Vec<u64>,
    },
    /// Reply to [`Message::TextureList`].
    TextureListReply {
        /// Serial of the answered request.
        serial: u32,
        /// Live texture ids.
        textures: Vec<u64>,
    },
    /// Reply to [`Message::TextureInfo`].
    TextureInfoReply {
        /// Serial of the answered request.
        serial: u32,
        /// Shape of the texture.
        info: TextureInfo,
    },
    /// Reply to [`Message::TextureRead`].
    TextureReadReply {
        /// Serial of the answered request.
        serial: u32,
        /// Bytes per block row in `data`.
        stride: u32,
        /// Raw texel data.
        data: Vec<u8>,
    },
    /// Reply to [`Message::ShaderList`].
    ShaderListReply {
        /// Serial of the answered request.
        serial: u32,
        /// Shader ids bound to the context.
        shaders: Vec<u64>,
    },
    /// Reply to [`Message::ShaderInfo`].
    ShaderInfoReply {
        /// Serial of the answered request.
        serial: u32,
        /// Original token stream.
        original: Vec<u32>,
        /// Replacement token stream (empty if none installed).
        replaced: Vec<u32>,
        /// Whether the shader is currently disabled.
        disabled: bool,
    },
}

impl Message {
    /// The message's wire opcode; negative for replies.
    pub fn opcode(&self) -> i32 {
        match self {
            Self::Ping => opcode::PING,
            Self::ContextList => opcode::CONTEXT_LIST,
            Self::ContextDrawBlock { .. } => opcode::CONTEXT_DRAW_BLOCK,
            Self::ContextDrawStep { .. } => opcode::CONTEXT_DRAW_STEP,
            Self::ContextDrawUnblock { .. } => opcode::CONTEXT_DRAW_UNBLOCK,
            Self::ContextFlush { .. } => opcode::CONTEXT_FLUSH,
            Self::TextureList => opcode::TEXTURE_LIST,
            Self::TextureInfo { .. } => opcode::TEXTURE_INFO,
            Self::TextureRead { .. } => opcode::TEXTURE_READ,
            Self::ShaderList { .. } => opcode::SHADER_LIST,
            Self::ShaderInfo { .. } => opcode::SHADER_INFO,
            Self::ShaderDisable { .. } => opcode::SHADER_DISABLE,
            Self::ShaderReplace { .. } => opcode::SHADER_REPLACE,
            Self::ContextDrawBlocked { .. } => opcode::CONTEXT_DRAW_BLOCKED,
            Self::PingReply { .. } => opcode::reply(opcode::PING),
            Self::ErrorReply { .. } => opcode::reply(opcode::ERROR),
            Self::ContextListReply { .. } => opcode::reply(opcode::CONTEXT_LIST),
            Self::TextureListReply { .. } => opcode::reply(opcode::TEXTURE_LIST),
            Self::TextureInfoReply { .. } => opcode::reply(opcode::TEXTURE_INFO),
            Self::TextureReadReply { .. } => opcode::reply(opcode::TEXTURE_READ),
            Self::ShaderListReply { .. } => opcode::reply(opcode::SHADER_LIST),
            Self::ShaderInfoReply { .. } => opcode::reply(opcode::SHADER_INFO),
        }
    }

    /// The serial of the answered request, if this is a reply.
    pub fn reply_serial(&self) -> Option<u32> {
        match self {
            Self::PingReply { serial }
            | Self::ErrorReply { serial, .. }
            | Self::ContextListReply { serial, .. }
            | Self::TextureListReply { serial, .. }
            | Self::TextureInfoReply { serial, .. }
            | Self::TextureReadReply { serial, .. }
            | Self::ShaderListReply { serial, .. }
            | Self::ShaderInfoReply { serial, .. } => Some(*serial),
            _ => None,
        }
    }

    /// Whether this message is a reply (negative opcode).
    pub fn is_reply(&self) -> bool {
        self.opcode() < 0
    }

    /// Serializes the payload fields (everything after the opcode).
    pub(crate) fn write_payload(&self, w: &mut PayloadWriter) {
        match self {
            Self::Ping | Self::ContextList | Self::TextureList => {}
            Self::ContextDrawBlock { context, mask }
            | Self::ContextDrawStep { context, mask }
            | Self::ContextDrawUnblock { context, mask }
            | Self::ContextDrawBlocked { context, mask } => {
                w.put_u64(*context);
                w.put_u32(*mask);
            }
            Self::ContextFlush { context } | Self::ShaderList { context } => {
                w.put_u64(*context);
            }
            Self::TextureInfo { texture } => w.put_u64(*texture),
            Self::TextureRead {
                texture,
                face,
                level,
                zslice,
                x,
                y,
                w: width,
                h: height,
            } => {
                w.put_u64(*texture);
                w.put_u32(*face);
                w.put_u32(*level);
                w.put_u32(*zslice);
                w.put_u32(*x);
                w.put_u32(*y);
                w.put_u32(*width);
                w.put_u32(*height);
            }
            Self::ShaderInfo { context, shader } => {
                w.put_u64(*context);
                w.put_u64(*shader);
            }
            Self::ShaderDisable {
                context,
                shader,
                disable,
            } => {
                w.put_u64(*context);
                w.put_u64(*shader);
                w.put_bool(*disable);
            }
            Self::ShaderReplace {
                context,
                shader,
                tokens,
            } => {
                w.put_u64(*context);
                w.put_u64(*shader);
                w.put_u32_slice(tokens);
            }
            Self::PingReply { serial } => w.put_u32(*serial),
            Self::ErrorReply { serial, error } => {
                w.put_u32(*serial);
                w.put_u32(*error);
            }
            Self::ContextListReply { serial, contexts } => {
                w.put_u32(*serial);
                w.put_u64_slice(contexts);
            }
            Self::TextureListReply { serial, textures } => {
                w.put_u32(*serial);
                w.put_u64_slice(textures);
            }
            Self::TextureInfoReply { serial, info } => {
                w.put_u32(*serial);
                w.put_u32(info.width);
                w.put_u32(info.height);
                w.put_u32(info.depth);
                w.put_u32(info.format);
                w.put_u32(info.block_width);
                w.put_u32(info.block_height);
                w.put_u32(info.block_size);
                w.put_u32(info.last_level);
            }
            Self::TextureReadReply {
                serial,
                stride,
                data,
            } => {
                w.put_u32(*serial);
                w.put_u32(*stride);
                w.put_bytes(data);
            }
            Self::ShaderListReply { serial, shaders } => {
                w.put_u32(*serial);
                w.put_u64_slice(shaders);
            }
            Self::ShaderInfoReply {
                serial,
                original,
                replaced,
                disabled,
            } => {
                w.put_u32(*serial);
                w.put_u32_slice(original);
                w.put_u32_slice(replaced);
                w.put_bool(*disabled);
            }
        }
    }

    /// Deserializes the payload fields for a decoded opcode.
    pub(crate) fn read_payload(op: i32, r: &mut PayloadReader<'_>) -> io::Result<Self> {
        let msg = match op {
            opcode::PING => Self::Ping,
            opcode::CONTEXT_LIST => Self::ContextList,
            opcode::CONTEXT_DRAW_BLOCK => Self::ContextDrawBlock {
                context: r.get_u64()?,
                mask: r.get_u32()?,
            },
            opcode::CONTEXT_DRAW_STEP => Self::ContextDrawStep {
                context: r.get_u64()?,
                mask: r.get_u32()?,
            },
            opcode::CONTEXT_DRAW_UNBLOCK => Self::ContextDrawUnblock {
                context: r.get_u64()?,
                mask: r.get_u32()?,
            },
            opcode::CONTEXT_DRAW_BLOCKED => Self::ContextDrawBlocked {
                context: r.get_u64()?,
                mask: r.get_u32()?,
            },
            opcode::CONTEXT_FLUSH => Self::ContextFlush {
                context: r.get_u64()?,
            },
            opcode::TEXTURE_LIST => Self::TextureList,
            opcode::TEXTURE_INFO => Self::TextureInfo {
                texture: r.get_u64()?,
            },
            opcode::TEXTURE_READ => Self::TextureRead {
                texture: r.get_u64()?,
                face: r.get_u32()?,
                level: r.get_u32()?,
                zslice: r.get_u32()?,
                x: r.get_u32()?,
                y: r.get_u32()?,
                w: r.get_u32()?,
                h: r.get_u32()?,
            },
            opcode::SHADER_LIST => Self::ShaderList {
                context: r.get_u64()?,
            },
            opcode::SHADER_INFO => Self::ShaderInfo {
                context: r.get_u64()?,
                shader: r.get_u64()?,
            },
            opcode::SHADER_DISABLE => Self::ShaderDisable {
                context: r.get_u64()?,
                shader: r.get_u64()?,
                disable: r.get_bool()?,
            },
            opcode::SHADER_REPLACE => Self::ShaderReplace {
                context: r.get_u64()?,
                shader: r.get_u64()?,
                tokens: r.get_u32_vec()?,
            },
            _ if op == opcode::reply(opcode::PING) => Self::PingReply {
                serial: r.get_u32()?,
            },
            _ if op == opcode::reply(opcode::ERROR) => Self::ErrorReply {
                serial: r.get_u32()?,
                error: r.get_u32()?,
            },
            _ if op == opcode::reply(opcode::CONTEXT_LIST) => Self::ContextListReply {
                serial: r.get_u32()?,
                contexts: r.get_u64_vec()?,
            },
            _ if op == opcode::reply(opcode::TEXTURE_LIST) => Self::TextureListReply {
                serial: r.get_u32()?,
                textures: r.get_u64_vec()?,
            },
            _ if op == opcode::reply(opcode::TEXTURE_INFO) => Self::TextureInfoReply {
                serial: r.get_u32()?,
                info: TextureInfo {
                    width: r.get_u32()?,
                    height: r.get_u32()?,
                    depth: r.get_u32()?,
                    format: r.get_u32()?,
                    block_width: r.get_u32()?,
                    block_height: r.get_u32()?,
                    block_size: r.get_u32()?,
                    last_level: r.get_u32()?,
                },
            },
            _ if op == opcode::reply(opcode::TEXTURE_READ) => Self::TextureReadReply {
                serial: r.get_u32()?,
                stride: r.get_u32()?,
                data: r.get_byte_vec()?,
            },
            _ if op == opcode::reply(opcode::SHADER_LIST) => Self::ShaderListReply {
                serial: r.get_u32()?,
                shaders: r.get_u64_vec()?,
            },
            _ if op == opcode::reply(opcode::SHADER_INFO) => Self::ShaderInfoReply {
                serial: r.get_u32()?,
                original: r.get_u32_vec()?,
                replaced: r.get_u32_vec()?,
                disabled: r.get_bool()?,
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown opcode {op}"),
                ));
            }
        };
        Ok(msg)
    }
}
