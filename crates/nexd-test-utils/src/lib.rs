//! Test fixtures for nexd.
//!
//! Provides in-memory stand-ins for the two descriptors a session
//! bridges: a fake PTY master and a fake secure channel. Both are built
//! on [`tokio::io::duplex`], so relay and handshake logic can be tested
//! byte-exactly without a real terminal or network.

mod fake_pty;

pub use fake_pty::{FakePty, PtyDriver};

use tokio::io::DuplexStream;

/// In-memory secure channel: one end for the agent under test, one for
/// the test acting as the submission client.
pub fn secure_channel_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(64 * 1024)
}
