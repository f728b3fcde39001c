//! Error types for debugger sessions.

/// Alias for `Result<T, rbug::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No port in the retry range accepted the connection.
    #[error("could not connect to {host} on any port {first}-{last}")]
    Connect {
        /// Host that was tried.
        host: String,
        /// First port in the retry range.
        first: u16,
        /// Last port in the retry range.
        last: u16,
    },

    /// The connection failed or was closed; the session is dead.
    #[error("connection to the driver lost")]
    Disconnected,

    /// The peer violated the protocol; the local operation was aborted.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An I/O error outside the connection itself.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
