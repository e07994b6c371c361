//! Terminal session driver.
//!
//! Ties the handshake and the relay together for one interactive job:
//! receive terminal type and control characters, configure the PTY,
//! receive and apply the initial window size, then pump bytes in both
//! directions until the channel or the PTY closes.
//!
//! Control characters and window size are session state, owned here and
//! never shared between sessions, so one agent process can safely drive
//! several interactive jobs concurrently.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use nexd_core::error::{Error, Result};
use nexd_core::protocol::{ControlChars, WindowSize, recv_terminal_type, recv_window_size};

use crate::pty::Pty;
use crate::relay::{CancelFlag, pump_inbound, pump_outbound};

/// One interactive job's terminal session.
///
/// Created by [`TerminalSession::establish`] once the secure channel is
/// up and the job-startup path has handed over the PTY master. Consumed
/// by [`TerminalSession::relay`], which runs for the session lifetime.
#[derive(Debug)]
pub struct TerminalSession<C> {
    channel: C,
    pty: Arc<Pty>,
    term_type: String,
    control_chars: ControlChars,
    window_size: WindowSize,
}

impl<C> TerminalSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Run the handshake and configure the PTY.
    ///
    /// The wire order is fixed: terminal type, then the control
    /// characters (applied best-effort), then the window size (applied
    /// hard, a resize failure aborts session setup). A window-size
    /// frame is never accepted before the terminal-type handshake
    /// completed.
    pub async fn establish(mut channel: C, pty: Pty) -> Result<Self> {
        let (term_type, control_chars) = recv_terminal_type(&mut channel).await?;
        let pty = Arc::new(pty);
        pty.apply_control_chars(&control_chars);

        let window_size = recv_window_size(&mut channel).await?;
        if let Err(e) = pty.apply_window_size(&window_size) {
            warn!(error = %e, "failed to apply initial window size");
            return Err(e);
        }

        info!(
            term = %term_type,
            rows = window_size.rows,
            cols = window_size.cols,
            "interactive session established"
        );

        Ok(Self {
            channel,
            pty,
            term_type,
            control_chars,
            window_size,
        })
    }

    /// Terminal type announced by the submission client.
    pub fn term_type(&self) -> &str {
        &self.term_type
    }

    /// Control characters received in the handshake.
    pub fn control_chars(&self) -> &ControlChars {
        &self.control_chars
    }

    /// Window size received in the handshake.
    pub fn window_size(&self) -> WindowSize {
        self.window_size
    }

    /// Apply a later window-size update to the PTY.
    pub fn update_window_size(&mut self, size: WindowSize) -> Result<()> {
        self.pty.apply_window_size(&size)?;
        self.window_size = size;
        Ok(())
    }

    /// Run both relay pumps to completion.
    ///
    /// `command` primes the PTY input (working-directory setup) before
    /// any user keystrokes; `cancel` requests orderly shutdown of the
    /// inbound pump between blocks. The outbound pump runs until the
    /// PTY closes, the shell's own exit signal.
    ///
    /// Returns the inbound and outbound outcomes; the session is over
    /// either way and the caller tears down channel and PTY.
    pub async fn relay(
        self,
        command: Option<String>,
        cancel: CancelFlag,
    ) -> (Result<()>, Result<()>) {
        let (mut channel_rx, mut channel_tx) = tokio::io::split(self.channel);

        let pty = Arc::clone(&self.pty);
        let inbound: JoinHandle<Result<()>> = tokio::spawn(async move {
            let mut pty_wr = &*pty;
            pump_inbound(&mut channel_rx, &mut pty_wr, command.as_deref(), &cancel).await
        });

        let pty = Arc::clone(&self.pty);
        let outbound: JoinHandle<Result<()>> = tokio::spawn(async move {
            let mut pty_rd = &*pty;
            pump_outbound(&mut pty_rd, &mut channel_tx).await
        });

        let (inbound, outbound) = tokio::join!(inbound, outbound);
        (flatten_join(inbound), flatten_join(outbound))
    }
}

fn flatten_join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(Error::Pty {
            message: format!("relay task failed: {e}"),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
