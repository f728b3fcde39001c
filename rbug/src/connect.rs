//! TCP transport connector with bounded port retry.
//!
//! Drivers pick the first free port at or above the default when they
//! start listening, so the client scans a small range upward and
//! remembers which port actually answered.

use std::net::TcpStream;

use tracing::debug;

use crate::error::{Error, Result};

/// Port an rbug-enabled driver listens on by default.
pub const DEFAULT_PORT: u16 = 13370;

/// Number of consecutive ports tried before giving up.
pub const PORT_ATTEMPTS: u16 = 10;

/// Opens a stream to `host`, scanning up from `first_port`.
///
/// Returns the stream together with the port that actually accepted,
/// so reconnect and display logic stay accurate.
pub(crate) fn connect(host: &str, first_port: u16) -> Result<(TcpStream, u16)> {
    let last = first_port.saturating_add(PORT_ATTEMPTS - 1);
    for port in first_port..=last {
        match TcpStream::connect((host, port)) {
            Ok(stream) => {
                debug!(host, port, "connected");
                return Ok((stream, port));
            }
            Err(e) => debug!(host, port, error = %e, "connect attempt failed"),
        }
    }
    Err(Error::Connect {
        host: host.to_owned(),
        first: first_port,
        last,
    })
}
