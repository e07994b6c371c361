//! PTY handling for interactive sessions.
//!
//! The PTY master is allocated by the job-startup path (which also
//! spawns the shell on the slave side); this module takes ownership of
//! the master descriptor and handles:
//! - Async I/O on the master via tokio's `AsyncFd` reactor integration
//! - Line-discipline configuration from the handshake control characters
//! - Window-size application from window-size update frames
//!
//! Uses the `nix` crate for termios and `libc` for the winsize ioctls.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use nix::sys::termios::{
    self, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices as Cc,
};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use nexd_core::error::{Error, Result};
use nexd_core::protocol::{ControlChars, WindowSize};

/// PTY master handle for async I/O.
///
/// Shared references implement [`AsyncRead`] and [`AsyncWrite`], so the
/// two relay pumps can drive one reader and one writer concurrently
/// over the same descriptor (safe at the OS level for a single reader
/// and a single writer).
#[derive(Debug)]
pub struct Pty {
    /// Master PTY file descriptor wrapped for async I/O.
    master: AsyncFd<std::fs::File>,
    /// Raw master fd for ioctl operations.
    master_fd: RawFd,
}

impl Pty {
    /// Take ownership of an already-allocated PTY master.
    ///
    /// The descriptor is switched to non-blocking mode and registered
    /// with the tokio reactor.
    pub fn from_master(master: OwnedFd) -> Result<Self> {
        let master_fd = master.as_raw_fd();
        set_nonblocking(master_fd)?;

        let file = std::fs::File::from(master);
        let master = AsyncFd::new(file).map_err(|e| Error::Pty {
            message: format!("failed to register pty with reactor: {e}"),
        })?;

        Ok(Self { master, master_fd })
    }

    /// Configure the slave terminal's line discipline with the control
    /// characters received in the handshake.
    ///
    /// Best-effort by design: if the device does not support attribute
    /// queries the attributes are left unchanged and no error is
    /// surfaced, the session proceeds with whatever the device has.
    /// This is deliberately asymmetric with [`Pty::apply_window_size`],
    /// which does surface failures.
    pub fn apply_control_chars(&self, cc: &ControlChars) {
        let mut tio = match termios::tcgetattr(self.master.get_ref()) {
            Ok(tio) => tio,
            Err(e) => {
                debug!(error = %e, "cannot query terminal attributes, leaving as-is");
                return;
            }
        };

        tio.input_flags = InputFlags::BRKINT
            | InputFlags::IGNPAR
            | InputFlags::ICRNL
            | InputFlags::IXON
            | InputFlags::IXOFF
            | InputFlags::IMAXBEL;
        tio.output_flags = OutputFlags::OPOST | OutputFlags::ONLCR;
        tio.local_flags = LocalFlags::ISIG
            | LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHOKE
            | LocalFlags::ECHOCTL;

        tio.control_chars[Cc::VEOL as usize] = 0;
        tio.control_chars[Cc::VEOL2 as usize] = 0;
        tio.control_chars[Cc::VSTART as usize] = 0x11; // ^Q
        tio.control_chars[Cc::VSTOP as usize] = 0x13; // ^S
        tio.control_chars[Cc::VREPRINT as usize] = 0x12; // ^R
        tio.control_chars[Cc::VLNEXT as usize] = 0x0f;

        tio.control_chars[Cc::VINTR as usize] = cc.intr();
        tio.control_chars[Cc::VQUIT as usize] = cc.quit();
        tio.control_chars[Cc::VERASE as usize] = cc.erase();
        tio.control_chars[Cc::VKILL as usize] = cc.kill();
        tio.control_chars[Cc::VEOF as usize] = cc.eof();
        tio.control_chars[Cc::VSUSP as usize] = cc.susp();

        if let Err(e) = termios::tcsetattr(self.master.get_ref(), SetArg::TCSANOW, &tio) {
            debug!(error = %e, "cannot set terminal attributes, leaving as-is");
        }
    }

    /// Apply a window size to the terminal.
    ///
    /// Unlike control-character application, a failure here is surfaced
    /// so the caller can log it.
    pub fn apply_window_size(&self, size: &WindowSize) -> Result<()> {
        let ws = libc::winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: size.xpixel,
            ws_ypixel: size.ypixel,
        };

        let rc = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &ws) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to set window size: {err}"),
            });
        }

        debug!(rows = size.rows, cols = size.cols, "window size applied");
        Ok(())
    }

    /// Read back the terminal's current window size.
    pub fn current_window_size(&self) -> Result<WindowSize> {
        let mut ws = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let rc = unsafe { libc::ioctl(self.master_fd, libc::TIOCGWINSZ, &mut ws) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to query window size: {err}"),
            });
        }

        Ok(WindowSize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            xpixel: ws.ws_xpixel,
            ypixel: ws.ws_ypixel,
        })
    }
}

impl AsyncRead for &Pty {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            let mut guard = ready!(self.master.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => {
                    // EIO from the master means the slave side closed
                    // (shell exited): report EOF, the authoritative
                    // end-of-session signal for the outbound pump.
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("pty read returned EIO, treating as EOF");
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(e));
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for &Pty {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        loop {
            let mut guard = ready!(self.master.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Writes to the master are not buffered in userspace.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fd is owned by the caller and stays valid for both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::Pty {
            message: format!("fcntl F_GETFL failed: {}", std::io::Error::last_os_error()),
        });
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(Error::Pty {
            message: format!("fcntl F_SETFL failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
