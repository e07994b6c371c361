//! Outbound connector to the submission host.
//!
//! The submission client listens; the agent dials out. The resulting
//! TCP stream is handed to the external channel-securing layer, which
//! authenticates and encrypts it before the session handshake starts.

use tokio::net::{TcpStream, lookup_host};
use tracing::debug;

use nexd_core::error::{Error, Result};

/// Role this side presents to the channel-securing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRole {
    Client,
    Server,
}

/// An established (not yet secured) connection to the submission host.
#[derive(Debug)]
pub struct SubmitterConnection {
    pub stream: TcpStream,
    /// Always [`AuthRole::Server`]: although the agent is the dialing
    /// side, the submission-side listener expects it to present server
    /// credentials. Deliberate asymmetry, consumed by the external
    /// channel-securing layer.
    pub auth_role: AuthRole,
}

/// Connect back to the submission client that owns this interactive job.
///
/// Resolution failure is fatal (`Error::Resolution`, `is_fatal()`):
/// retrying cannot help until the name resolves. Connection failures
/// are transient (`Error::Connect`, `is_transient()`): the caller's
/// backoff loop retries those and only those.
pub async fn connect_to_submitter(hostname: &str, port: u16) -> Result<SubmitterConnection> {
    let mut addrs = lookup_host((hostname, port))
        .await
        .map_err(|_| Error::Resolution {
            host: hostname.to_string(),
        })?;
    let addr = addrs.next().ok_or_else(|| Error::Resolution {
        host: hostname.to_string(),
    })?;

    let stream = TcpStream::connect(addr).await.map_err(|e| Error::Connect {
        message: format!("{addr}: {e}"),
    })?;

    debug!(%addr, "connected to submission host");
    Ok(SubmitterConnection {
        stream,
        auth_role: AuthRole::Server,
    })
}

// =============================================================================
// Tests
// =============================================================================
