//! Socket readiness polling for the standalone run loop.
//!
//! External reactors (a GUI main loop, typically) watch the session's
//! descriptor themselves and call [`crate::Session::pump`] on
//! readability; this module serves consumers without a reactor.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;

/// Readiness of the connection's socket after a poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// A message (or EOF) can be read without blocking.
    pub readable: bool,
    /// The peer hung up or the socket errored.
    pub closed: bool,
}

/// Polls `fd` for readability or hangup.
///
/// `timeout_ms` follows `poll(2)`: negative blocks indefinitely, zero
/// returns immediately. EINTR is retried.
pub(crate) fn wait(fd: RawFd, timeout_ms: i32) -> io::Result<Readiness> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN | libc::POLLPRI,
        revents: 0,
    };
    loop {
        // SAFETY: pfd is a valid pollfd and fd is owned by the
        // session's stream for the duration of the call.
        let ret = unsafe { libc::poll(&raw mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(Readiness::default());
        }
        return Ok(Readiness {
            readable: pfd.revents & (libc::POLLIN | libc::POLLPRI) != 0,
            closed: pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
        });
    }
}
