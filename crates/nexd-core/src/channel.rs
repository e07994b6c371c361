//! Reliable I/O over the secure channel.
//!
//! The secure channel is an externally established byte stream (the
//! channel-securing layer owns authentication and encryption); this
//! module only assumes short-read/short-write semantics. Neither
//! sockets nor PTYs guarantee single-call completion, so every call
//! site loops until the requested count is satisfied or a terminal
//! condition (EOF/error) is reached, and an interrupted system call is
//! always retried in place.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;

/// Read until `buf` is full, the peer closes, or a read fails.
///
/// Returns the number of bytes actually obtained. A count short of
/// `buf.len()` means the peer closed cleanly mid-frame; that is not an
/// error here, the caller decides whether a short frame is acceptable.
/// Only a hard read failure produces `Err`; short-but-nonzero
/// individual reads just continue the loop.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(got = total, want = buf.len(), error = %e, "channel read failed");
                return Err(e.into());
            }
        }
    }
    Ok(total)
}

/// Write all of `buf`, looping over partial writes.
///
/// An interrupted write is retried; a zero-length write from the sink
/// is reported as `WriteZero` rather than looping forever.
pub async fn write_full<W>(writer: &mut W, buf: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut remaining = buf;
    while !remaining.is_empty() {
        match writer.write(remaining).await {
            Ok(0) => {
                debug!(remaining = remaining.len(), "sink accepted zero bytes");
                return Err(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "sink accepted zero bytes",
                )
                .into());
            }
            Ok(n) => remaining = &remaining[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(remaining = remaining.len(), error = %e, "channel write failed");
                return Err(e.into());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::ErrorKind;

    #[tokio::test]
    async fn read_full_accumulates_short_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"de")
            .build();

        let mut buf = [0u8; 5];
        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"abcde");
    }

    #[tokio::test]
    async fn read_full_short_on_clean_eof() {
        let mut reader = tokio_test::io::Builder::new().read(b"abc").build();

        let mut buf = [0u8; 8];
        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[tokio::test]
    async fn read_full_zero_on_immediate_eof() {
        let mut reader = tokio_test::io::Builder::new().build();

        let mut buf = [0u8; 4];
        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn read_full_propagates_hard_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"ab")
            .read_error(std::io::Error::new(ErrorKind::ConnectionReset, "reset"))
            .build();

        let mut buf = [0u8; 4];
        let err = read_full(&mut reader, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn read_full_retries_interrupted() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"ab")
            .read_error(std::io::Error::new(ErrorKind::Interrupted, "eintr"))
            .read(b"cd")
            .build();

        let mut buf = [0u8; 4];
        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"abcd");
    }

    #[tokio::test]
    async fn write_full_loops_over_partial_writes() {
        let mut writer = tokio_test::io::Builder::new()
            .write(b"ab")
            .write(b"cde")
            .build();

        write_full(&mut writer, b"abcde").await.unwrap();
    }

    #[tokio::test]
    async fn write_full_retries_interrupted() {
        let mut writer = tokio_test::io::Builder::new()
            .write(b"ab")
            .write_error(std::io::Error::new(ErrorKind::Interrupted, "eintr"))
            .write(b"cd")
            .build();

        write_full(&mut writer, b"abcd").await.unwrap();
    }

    #[tokio::test]
    async fn write_full_propagates_hard_error() {
        let mut writer = tokio_test::io::Builder::new()
            .write(b"ab")
            .write_error(std::io::Error::new(ErrorKind::BrokenPipe, "pipe"))
            .build();

        let err = write_full(&mut writer, b"abcd").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
