//! Wire protocol for the rbug remote debugging connection.
//!
//! Messages are fixed-width big-endian structs framed with a 4-byte
//! length prefix and a 4-byte signed opcode, suitable for any reliable
//! byte stream (TCP, Unix socket).
//!
//! The opcode sign carries the message direction: a negative opcode is
//! a reply and its payload starts with the 32-bit serial number of the
//! request it answers; a non-negative opcode is a request or a
//! server-pushed event and carries no serial.

mod codec;
mod message;

pub use codec::{decode, encode};
pub use message::{
    DRAW_BLOCK_AFTER, DRAW_BLOCK_BEFORE, DRAW_BLOCK_RULE, Message, TextureInfo, opcode,
};
