//! Handshake wire protocol for interactive sessions.
//!
//! The submission client opens the session by sending, over the secure
//! channel, fixed-size unframed ASCII messages:
//!
//! | Message              | Size          | Format                          |
//! |----------------------|---------------|---------------------------------|
//! | Terminal type        | `TERM_BUF_SZ` | `TERM=<name>` then NUL padding  |
//! | Control characters   | `TERM_CCA`    | raw INTR,QUIT,ERASE,KILL,EOF,SUSP |
//! | Window size update   | `TERM_BUF_SZ` | `WINSIZE r,c,x,y` then padding  |
//!
//! The control-character block always immediately follows a successful
//! terminal-type frame; a window-size frame is only valid after the
//! terminal-type handshake completed. There is no length prefix: both
//! ends must agree on `TERM_BUF_SZ` out of band.
//!
//! Encoders exist for the submission-side peer and for tests; the agent
//! itself only receives.

use tokio::io::AsyncRead;

use crate::channel::read_full;
use crate::constants::{TERM_BUF_SZ, TERM_CCA, TERM_PREFIX, WINSIZE_KEYWORD};
use crate::error::{Error, Result};

// =============================================================================
// Types
// =============================================================================

/// The six control characters carried by the handshake, in wire order:
/// INTR, QUIT, ERASE, KILL, EOF, SUSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChars(pub [u8; TERM_CCA]);

impl ControlChars {
    pub fn intr(&self) -> u8 {
        self.0[0]
    }
    pub fn quit(&self) -> u8 {
        self.0[1]
    }
    pub fn erase(&self) -> u8 {
        self.0[2]
    }
    pub fn kill(&self) -> u8 {
        self.0[3]
    }
    pub fn eof(&self) -> u8 {
        self.0[4]
    }
    pub fn susp(&self) -> u8 {
        self.0[5]
    }
}

impl Default for ControlChars {
    /// Conventional Unix defaults: ^C ^\ DEL ^U ^D ^Z.
    fn default() -> Self {
        Self([0x03, 0x1c, 0x7f, 0x15, 0x04, 0x1a])
    }
}

/// Terminal geometry as carried by the window-size frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub xpixel: u16,
    pub ypixel: u16,
}

// =============================================================================
// Frame codecs
// =============================================================================

fn protocol_err(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

/// Text payload of a fixed-size frame: bytes up to the first NUL, or the
/// whole frame when the payload exactly fills it.
fn frame_text(frame: &[u8]) -> Result<&str> {
    let end = frame.iter().position(|&b| b == 0).unwrap_or(frame.len());
    std::str::from_utf8(&frame[..end]).map_err(|_| protocol_err("frame is not valid UTF-8"))
}

/// Parse a terminal-type frame, returning the `<name>` part.
///
/// The frame must be exactly `TERM_BUF_SZ` bytes and begin with the
/// literal `TERM=`; the name runs to the first NUL (or the end of the
/// frame when the name fills it).
pub fn parse_terminal_type(frame: &[u8]) -> Result<&str> {
    if frame.len() != TERM_BUF_SZ {
        return Err(protocol_err(format!(
            "terminal-type frame is {} bytes, want {}",
            frame.len(),
            TERM_BUF_SZ
        )));
    }
    if !frame.starts_with(TERM_PREFIX) {
        return Err(protocol_err("terminal-type frame lacks TERM= prefix"));
    }
    frame_text(frame).map(|s| &s[TERM_PREFIX.len()..])
}

/// Parse a window-size frame: `WINSIZE <rows>,<cols>,<xpixel>,<ypixel>`
/// with exactly four unsigned 16-bit integers.
pub fn parse_window_size(frame: &[u8]) -> Result<WindowSize> {
    if frame.len() != TERM_BUF_SZ {
        return Err(protocol_err(format!(
            "window-size frame is {} bytes, want {}",
            frame.len(),
            TERM_BUF_SZ
        )));
    }
    let text = frame_text(frame)?;
    let rest = text
        .strip_prefix(WINSIZE_KEYWORD)
        .ok_or_else(|| protocol_err("window-size frame lacks WINSIZE keyword"))?;

    let fields: Vec<&str> = rest.trim().split(',').collect();
    if fields.len() != 4 {
        return Err(protocol_err(format!(
            "window-size frame has {} fields, want 4",
            fields.len()
        )));
    }

    let mut values = [0u16; 4];
    for (slot, field) in values.iter_mut().zip(&fields) {
        *slot = field
            .trim()
            .parse()
            .map_err(|_| protocol_err(format!("bad window-size field {:?}", field)))?;
    }

    Ok(WindowSize {
        rows: values[0],
        cols: values[1],
        xpixel: values[2],
        ypixel: values[3],
    })
}

/// Encode a terminal-type frame. Fails if `name` does not fit the frame
/// after the `TERM=` prefix (names up to `TERM_BUF_SZ - 5` bytes fit).
pub fn encode_terminal_type(name: &str) -> Result<[u8; TERM_BUF_SZ]> {
    if name.len() > TERM_BUF_SZ - TERM_PREFIX.len() {
        return Err(protocol_err(format!(
            "terminal type {:?} exceeds frame capacity",
            name
        )));
    }
    if name.as_bytes().contains(&0) {
        return Err(protocol_err("terminal type contains NUL"));
    }
    let mut frame = [0u8; TERM_BUF_SZ];
    frame[..TERM_PREFIX.len()].copy_from_slice(TERM_PREFIX);
    frame[TERM_PREFIX.len()..TERM_PREFIX.len() + name.len()].copy_from_slice(name.as_bytes());
    Ok(frame)
}

/// Encode a window-size frame.
pub fn encode_window_size(size: &WindowSize) -> [u8; TERM_BUF_SZ] {
    let text = format!(
        "{} {},{},{},{}",
        WINSIZE_KEYWORD, size.rows, size.cols, size.xpixel, size.ypixel
    );
    let mut frame = [0u8; TERM_BUF_SZ];
    frame[..text.len()].copy_from_slice(text.as_bytes());
    frame
}

// =============================================================================
// Channel receivers
// =============================================================================

/// Receive the terminal-type announcement and the control-character
/// block that immediately follows it.
///
/// A frame short by even one byte, or lacking the `TERM=` prefix, fails
/// the call before the control-character block is consumed. A short
/// control-character block fails the whole call as well: no partial
/// handshake state is usable.
pub async fn recv_terminal_type<C>(channel: &mut C) -> Result<(String, ControlChars)>
where
    C: AsyncRead + Unpin,
{
    let mut frame = [0u8; TERM_BUF_SZ];
    let n = read_full(channel, &mut frame).await?;
    if n != TERM_BUF_SZ {
        return Err(protocol_err(format!(
            "short terminal-type frame: {} of {} bytes",
            n, TERM_BUF_SZ
        )));
    }
    let term = parse_terminal_type(&frame)?.to_string();

    let mut cc = [0u8; TERM_CCA];
    let n = read_full(channel, &mut cc).await?;
    if n != TERM_CCA {
        return Err(protocol_err(format!(
            "short control-character block: {} of {} bytes",
            n, TERM_CCA
        )));
    }

    Ok((term, ControlChars(cc)))
}

/// Receive a window-size update frame.
pub async fn recv_window_size<C>(channel: &mut C) -> Result<WindowSize>
where
    C: AsyncRead + Unpin,
{
    let mut frame = [0u8; TERM_BUF_SZ];
    let n = read_full(channel, &mut frame).await?;
    if n != TERM_BUF_SZ {
        return Err(protocol_err(format!(
            "short window-size frame: {} of {} bytes",
            n, TERM_BUF_SZ
        )));
    }
    parse_window_size(&frame)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn term_frame(name: &str) -> [u8; TERM_BUF_SZ] {
        encode_terminal_type(name).unwrap()
    }

    #[test]
    fn terminal_type_roundtrip() {
        for name in ["", "vt100", "xterm-256color"] {
            let frame = term_frame(name);
            assert_eq!(parse_terminal_type(&frame).unwrap(), name);
        }
    }

    #[test]
    fn terminal_type_fills_frame() {
        // Longest name: no room left for a NUL terminator.
        let name = "x".repeat(TERM_BUF_SZ - TERM_PREFIX.len());
        let frame = term_frame(&name);
        assert_eq!(parse_terminal_type(&frame).unwrap(), name);

        let too_long = "x".repeat(TERM_BUF_SZ - TERM_PREFIX.len() + 1);
        assert!(encode_terminal_type(&too_long).is_err());
    }

    #[test]
    fn terminal_type_rejects_wrong_prefix() {
        let mut frame = [0u8; TERM_BUF_SZ];
        frame[..5].copy_from_slice(b"TYPE=");
        assert!(parse_terminal_type(&frame).is_err());
    }

    #[test]
    fn terminal_type_rejects_short_frame() {
        let frame = term_frame("vt100");
        assert!(parse_terminal_type(&frame[..TERM_BUF_SZ - 1]).is_err());
    }

    #[test]
    fn window_size_roundtrip() {
        let size = WindowSize {
            rows: 24,
            cols: 80,
            xpixel: 640,
            ypixel: 480,
        };
        let frame = encode_window_size(&size);
        assert_eq!(parse_window_size(&frame).unwrap(), size);
    }

    #[test]
    fn window_size_rejects_wrong_arity() {
        let mut frame = [0u8; TERM_BUF_SZ];
        let text = b"WINSIZE 24,80,640";
        frame[..text.len()].copy_from_slice(text);
        assert!(parse_window_size(&frame).is_err());

        let mut frame = [0u8; TERM_BUF_SZ];
        let text = b"WINSIZE 24,80,640,480,1";
        frame[..text.len()].copy_from_slice(text);
        assert!(parse_window_size(&frame).is_err());
    }

    #[test]
    fn window_size_rejects_wrong_keyword() {
        let mut frame = [0u8; TERM_BUF_SZ];
        frame[..7].copy_from_slice(b"GARBAGE");
        assert!(parse_window_size(&frame).is_err());
    }

    #[test]
    fn window_size_rejects_non_numeric() {
        let mut frame = [0u8; TERM_BUF_SZ];
        let text = b"WINSIZE a,b,c,d";
        frame[..text.len()].copy_from_slice(text);
        assert!(parse_window_size(&frame).is_err());
    }

    #[tokio::test]
    async fn recv_terminal_type_reads_both_frames() {
        let frame = term_frame("xterm");
        let cc = [3u8, 28, 127, 21, 4, 26];
        let mut channel = tokio_test::io::Builder::new()
            .read(&frame)
            .read(&cc)
            .build();

        let (term, chars) = recv_terminal_type(&mut channel).await.unwrap();
        assert_eq!(term, "xterm");
        assert_eq!(chars, ControlChars(cc));
        assert_eq!(chars.intr(), 3);
        assert_eq!(chars.susp(), 26);
    }

    #[tokio::test]
    async fn recv_terminal_type_across_short_reads() {
        let frame = term_frame("vt220");
        let mut channel = tokio_test::io::Builder::new()
            .read(&frame[..10])
            .read(&frame[10..])
            .read(&[1, 2, 3])
            .read(&[4, 5, 6])
            .build();

        let (term, chars) = recv_terminal_type(&mut channel).await.unwrap();
        assert_eq!(term, "vt220");
        assert_eq!(chars.0, [1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn recv_terminal_type_short_frame_is_protocol_error() {
        // Peer closes one byte early: no control-character block is read.
        let frame = term_frame("xterm");
        let mut channel = tokio_test::io::Builder::new()
            .read(&frame[..TERM_BUF_SZ - 1])
            .build();

        let err = recv_terminal_type(&mut channel).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn recv_terminal_type_short_cc_block_fails_whole_call() {
        let frame = term_frame("xterm");
        let mut channel = tokio_test::io::Builder::new()
            .read(&frame)
            .read(&[3, 28, 127])
            .build();

        let err = recv_terminal_type(&mut channel).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn recv_window_size_parses_frame() {
        let frame = encode_window_size(&WindowSize {
            rows: 50,
            cols: 132,
            xpixel: 0,
            ypixel: 0,
        });
        let mut channel = tokio_test::io::Builder::new().read(&frame).build();

        let size = recv_window_size(&mut channel).await.unwrap();
        assert_eq!(size.rows, 50);
        assert_eq!(size.cols, 132);
    }

    #[tokio::test]
    async fn recv_window_size_rejects_short_frame() {
        let frame = encode_window_size(&WindowSize::default());
        let mut channel = tokio_test::io::Builder::new().read(&frame[..8]).build();

        let err = recv_window_size(&mut channel).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn default_control_chars_are_conventional() {
        let cc = ControlChars::default();
        assert_eq!(cc.intr(), 0x03); // ^C
        assert_eq!(cc.eof(), 0x04); // ^D
        assert_eq!(cc.erase(), 0x7f); // DEL
    }
}
