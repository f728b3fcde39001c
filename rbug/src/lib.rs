//! Client engine for the rbug remote graphics debugging protocol.
//!
//! `rbug` connects to a driver's debug socket and multiplexes requests,
//! replies and server-pushed events over it from a single thread. The
//! consumer supplies a [`Model`] sink for the object tree the engine
//! discovers (contexts, shaders, textures) and drives the connection
//! either from its own reactor via [`Session::pump`] or with the
//! built-in poll loop.
//!
//! # Quick start — dump the object tree
//!
//! ```no_run
//! use rbug::{Model, Session};
//! # struct Printer;
//! # impl Model for Printer {
//! #     fn clear(&mut self) {}
//! #     fn add_node(
//! #         &mut self,
//! #         _: Option<rbug::NodeId>,
//! #         _: rbug::ObjectKind,
//! #         _: u64,
//! #     ) -> rbug::NodeId { rbug::NodeId(0) }
//! #     fn texture_info(&mut self, _: rbug::NodeId, _: &rbug::TextureInfo) {}
//! #     fn texture_data(&mut self, _: rbug::NodeId, _: &rbug::TextureData) {}
//! #     fn shader_info(&mut self, _: rbug::NodeId, _: &rbug::ShaderState) {}
//! #     fn draw_blocked(&mut self, _: u64, _: u32) {}
//! #     fn connection_lost(&mut self) {}
//! # }
//!
//! let mut session = Session::connect("localhost", rbug::DEFAULT_PORT, Box::new(Printer))?;
//! session.refresh()?;
//! session.settle()?;
//! # Ok::<(), rbug::Error>(())
//! ```

mod action;
mod connect;
pub mod context;
mod error;
mod model;
#[cfg(unix)]
mod poll;
mod registry;
mod session;
pub mod shader;
#[cfg(test)]
mod testutil;
pub mod texture;

pub use action::Lifecycle;
pub use connect::DEFAULT_PORT;
pub use error::{Error, Result};
pub use model::{Model, NodeId, ObjectKind, ShaderState, TextureData};
#[cfg(unix)]
pub use poll::Readiness;
pub use rbug_proto::TextureInfo;
pub use registry::{EventDisposition, EventHandler, ReplyHandler};
pub use session::{ConnState, Session, Stream};
