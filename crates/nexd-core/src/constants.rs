//! Protocol and configuration constants for nexd.

// =============================================================================
// Handshake Protocol Constants
// =============================================================================

/// Fixed size of the text handshake frames (terminal type, window size).
///
/// The frames carry no length prefix; both ends of the channel must be
/// built with the same value.
pub const TERM_BUF_SZ: usize = 80;

/// Number of control characters in the handshake control-character block:
/// INTR, QUIT, ERASE, KILL, EOF, SUSP.
pub const TERM_CCA: usize = 6;

/// Literal prefix of the terminal-type announcement frame.
pub const TERM_PREFIX: &[u8] = b"TERM=";

/// Literal keyword of the window-size update frame.
pub const WINSIZE_KEYWORD: &str = "WINSIZE";

// =============================================================================
// Relay Constants
// =============================================================================

/// Block size used by the relay pumps for both channel and PTY reads.
pub const RELAY_BUF_SIZE: usize = 8 * 1024;

// =============================================================================
// X11 Forwarding Constants
// =============================================================================

/// TCP port of X11 display 0; display `n` listens on `X_PORT + n`.
pub const X_PORT: u16 = 6000;

/// First display number probed by the allocator. Displays below this are
/// left to real X servers running on the node.
pub const X11_OFFSET: u16 = 50;

/// One past the last display number probed by the allocator.
pub const MAX_DISPLAYS: u16 = 500;

/// Maximum listening sockets bound for one display (localhost-only mode
/// binds one per loopback address up to this cap).
pub const X11_MAX_LISTENERS: usize = 10;

/// Listen backlog for X11 display sockets.
pub const X11_LISTEN_BACKLOG: u32 = 10;
