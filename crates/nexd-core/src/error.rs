//! Error types for nexd.
//!
//! Clean peer closure is deliberately NOT an error anywhere in this
//! crate: channel EOF surfaces as a short read count or as an explicit
//! peer-closed outcome, so `Error` only covers conditions that abort a
//! handshake, a pump, or an allocation.

use thiserror::Error;

/// Main error type for nexd operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or short handshake frame.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// PTY error (termios, winsize, relay I/O on the master side).
    #[error("pty error: {message}")]
    Pty { message: String },

    /// Submission host could not be resolved. Fatal: retrying the
    /// connection cannot help until the name resolves.
    #[error("cannot resolve submission host {host}")]
    Resolution { host: String },

    /// Connection establishment to the submission host failed with a
    /// transient condition; the caller's backoff loop may retry.
    #[error("connect to submission host failed: {message}")]
    Connect { message: String },

    /// No free X11 display number in the probed range.
    #[error("no free X11 display in {first}..{last}")]
    DisplayExhausted { first: u16, last: u16 },
}

impl Error {
    /// Returns true if this error is transient and a retry may help.
    ///
    /// The connector maps these to its RETRY outcome; probing further
    /// display numbers is handled inside the allocator, not here.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Io(_))
    }

    /// Returns true if this error is fatal and retrying won't help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. }
                | Error::Resolution { .. }
                | Error::DisplayExhausted { .. }
        )
    }
}

/// Convenience result type for nexd operations.
pub type Result<T> = std::result::Result<T, Error>;
