//! nexd-core: Shared library for the nexd interactive-job I/O bridge.
//!
//! This crate provides:
//! - Handshake wire frames (terminal type, control characters, window size)
//! - Reliable channel I/O helpers (exact-count reads, full writes)
//! - Error taxonomy shared by the agent components
//! - Logging setup

pub mod channel;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;

pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
