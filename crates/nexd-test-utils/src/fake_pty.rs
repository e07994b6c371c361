//! Fake PTY for testing without a real terminal.
//!
//! The master side behaves like a PTY master descriptor (byte stream,
//! EOF on hangup) but applies no line discipline, so tests can assert
//! relayed bytes exactly.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

/// Master side of a fake PTY. Implements [`AsyncRead`] and
/// [`AsyncWrite`] like the real master descriptor.
#[derive(Debug)]
pub struct FakePty {
    io: DuplexStream,
}

/// Process side of a fake PTY: what the job's shell would see.
#[derive(Debug)]
pub struct PtyDriver {
    io: DuplexStream,
}

impl FakePty {
    /// Open a fake master/process pair.
    pub fn open() -> (FakePty, PtyDriver) {
        let (master, process) = tokio::io::duplex(64 * 1024);
        (FakePty { io: master }, PtyDriver { io: process })
    }
}

impl AsyncRead for FakePty {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for FakePty {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl PtyDriver {
    /// Produce shell output: appears on master reads.
    pub async fn emit_output(&mut self, data: &[u8]) {
        self.io.write_all(data).await.expect("fake pty closed");
    }

    /// Consume exactly `n` bytes of shell input (what was written to
    /// the master).
    pub async fn read_input(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.io.read_exact(&mut buf).await.expect("fake pty closed");
        buf
    }

    /// Hang up the process side: master reads hit EOF, like a shell
    /// exiting.
    pub fn hangup(self) {}
}

// =============================================================================
// Tests
// =============================================================================
