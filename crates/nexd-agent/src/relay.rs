//! Relay pumps between the secure channel and the PTY.
//!
//! A session runs two independent pumps over the same channel/PTY pair:
//! the inbound pump (channel to PTY, keystrokes) and the outbound pump
//! (PTY to channel, screen output). The pumps share no state and are
//! scheduled as separate tasks; within each direction byte order is
//! preserved exactly, across directions there is no ordering.
//!
//! Both pumps follow one I/O discipline (see [`nexd_core::channel`]):
//! loop over partial reads and writes, retry interrupted calls in
//! place, treat a zero-length read as clean closure, and fail hard on
//! anything else.

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace};

use nexd_core::channel::write_full;
use nexd_core::constants::RELAY_BUF_SIZE;
use nexd_core::error::Result;

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag for the inbound pump.
///
/// Checked once per outer loop iteration, between blocks, never while a
/// read or write is in flight; cancellation may therefore be delayed by
/// up to one full read/write cycle. The outbound pump has no
/// cancellation path at all: it ends when the PTY closes, which is the
/// job shell's own exit signal.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request orderly shutdown at the next block boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a single-shot pump cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Data was relayed, or an interrupted read relayed nothing; the
    /// caller may run another cycle.
    Progress,
    /// The peer closed the channel; the session ends cleanly. Distinct
    /// from an error: callers escalate errors but simply wind down on
    /// peer closure.
    PeerClosed,
}

// =============================================================================
// Pumps
// =============================================================================

/// Inbound pump: secure channel to PTY input.
///
/// If `command` is given it is written fully into the PTY input stream
/// before any channel data, priming the shell before user keystrokes
/// arrive. The pump then relays blocks until the peer closes (`Ok`), a
/// hard I/O error occurs (`Err`), or `cancel` is observed at a block
/// boundary (`Ok`).
pub async fn pump_inbound<R, W>(
    channel: &mut R,
    pty: &mut W,
    command: Option<&str>,
    cancel: &CancelFlag,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(command) = command {
        inject_command(pty, command).await?;
    }

    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    while !cancel.is_cancelled() {
        match channel.read(&mut buf).await {
            Ok(0) => {
                debug!("channel closed by peer, inbound pump done");
                return Ok(());
            }
            Ok(n) => {
                trace!(len = n, "inbound block");
                write_full(pty, &buf[..n]).await?;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "channel read failed, inbound pump aborting");
                return Err(e.into());
            }
        }
    }

    debug!("inbound pump cancelled");
    Ok(())
}

/// Single-shot inbound pump for the alternate execution mode: exactly
/// one read-then-relay cycle.
pub async fn pump_inbound_once<R, W>(channel: &mut R, pty: &mut W) -> Result<PumpOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    match channel.read(&mut buf).await {
        Ok(0) => Ok(PumpOutcome::PeerClosed),
        Ok(n) => {
            write_full(pty, &buf[..n]).await?;
            Ok(PumpOutcome::Progress)
        }
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(PumpOutcome::Progress),
        Err(e) => Err(e.into()),
    }
}

/// Write a caller-supplied command string fully into the PTY input
/// stream. Used to prime the job's working-directory context before the
/// relay proper begins.
pub async fn inject_command<W>(pty: &mut W, command: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if command.is_empty() {
        return Ok(());
    }
    write_full(pty, command.as_bytes()).await
}

/// Outbound pump: PTY output to secure channel.
///
/// Runs until the PTY reads EOF (the shell exited) or errors; there is
/// no external stop flag in this direction.
pub async fn pump_outbound<R, W>(pty: &mut R, channel: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUF_SIZE];
    loop {
        match pty.read(&mut buf).await {
            Ok(0) => {
                debug!("pty closed, outbound pump done");
                return Ok(());
            }
            Ok(n) => {
                trace!(len = n, "outbound block");
                write_full(channel, &buf[..n]).await?;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "pty read failed, outbound pump aborting");
                return Err(e.into());
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
