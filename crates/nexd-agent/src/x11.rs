//! X11 display allocation for jobs requesting X forwarding.
//!
//! Display numbers map 1:1 to TCP ports (`base_port + display`), and
//! several interactive jobs may race for them on a shared node, so a
//! free display is found by probing: scan the display range, bind the
//! port, and keep the first display number that sticks. The resulting
//! listener set is handed to the external X11 forwarder; this module
//! never accepts or proxies X11 traffic itself.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

use tokio::net::{TcpListener, TcpSocket, lookup_host};
use tracing::{debug, info, warn};

use nexd_core::constants::{
    MAX_DISPLAYS, X_PORT, X11_LISTEN_BACKLOG, X11_MAX_LISTENERS, X11_OFFSET,
};
use nexd_core::error::{Error, Result};

// =============================================================================
// Auth spec
// =============================================================================

/// Caller-supplied X11 authentication spec: `protocol:hexdata:screen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X11AuthSpec {
    pub protocol: String,
    pub hex_data: String,
    pub screen: u32,
}

impl FromStr for X11AuthSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 3 {
            return Err(Error::Protocol {
                message: format!("x11 auth spec has {} fields, want 3", fields.len()),
            });
        }
        let protocol = fields[0].trim();
        let hex_data = fields[1].trim();
        if protocol.is_empty() || hex_data.is_empty() {
            return Err(Error::Protocol {
                message: "x11 auth spec has empty protocol or data field".into(),
            });
        }
        let screen = fields[2].trim().parse().map_err(|_| Error::Protocol {
            message: format!("bad x11 screen number {:?}", fields[2]),
        })?;
        Ok(Self {
            protocol: protocol.to_string(),
            hex_data: hex_data.to_string(),
            screen,
        })
    }
}

// =============================================================================
// Allocation
// =============================================================================

/// Allocator parameters. The defaults are the production values; tests
/// and deployments with non-standard X port layouts override them.
#[derive(Debug, Clone)]
pub struct X11DisplayConfig {
    /// First display number probed.
    pub display_offset: u16,
    /// One past the last display number probed.
    pub max_displays: u16,
    /// TCP port of display 0.
    pub base_port: u16,
    /// Bind loopback addresses only instead of the wildcard address.
    pub localhost_only: bool,
    /// Listener cap per display in localhost-only mode.
    pub max_listeners: usize,
    /// Listen backlog.
    pub backlog: u32,
    /// Explicit candidate bind addresses per display. `None` resolves
    /// them from the mode: wildcard IPv4, or loopback-resolved
    /// addresses in localhost-only mode. Non-IPv4 entries are skipped
    /// either way.
    pub bind_addrs: Option<Vec<IpAddr>>,
}

impl Default for X11DisplayConfig {
    fn default() -> Self {
        Self {
            display_offset: X11_OFFSET,
            max_displays: MAX_DISPLAYS,
            base_port: X_PORT,
            localhost_only: false,
            max_listeners: X11_MAX_LISTENERS,
            backlog: X11_LISTEN_BACKLOG,
            bind_addrs: None,
        }
    }
}

/// An allocated X11 display: the winning display number, the display
/// string for the job environment, and the listening sockets.
///
/// Ownership of the listeners passes to the caller, which hands them to
/// the X11 forwarder and closes them on job teardown; nothing here
/// cleans them up in the background.
#[derive(Debug)]
pub struct X11Display {
    pub number: u16,
    /// `localhost:<number>.<screen>`, for the job's DISPLAY variable.
    pub display: String,
    pub listeners: Vec<TcpListener>,
}

/// Allocate an X11 display for a job that requested X forwarding.
///
/// Parses `auth_spec` (hard failure before any socket is opened),
/// exports `HOME` for downstream X-authority file resolution, then
/// scans display numbers from `config.display_offset` until a display's
/// port binds. A display is all-or-nothing: if any of its candidate
/// addresses fails to bind as the last remaining one, every socket
/// already bound for that display is closed and the scan advances.
///
/// A listen failure after binding closes the entire candidate set
/// before the error is returned, so no listener can leak to a caller
/// that never sees the display number.
pub async fn init_x11_display(
    home_dir: &Path,
    auth_spec: &str,
    config: &X11DisplayConfig,
) -> Result<X11Display> {
    let auth: X11AuthSpec = auth_spec.parse()?;

    // Downstream X-authority resolution reads HOME.
    // SAFETY: the agent mutates its environment only here and in the
    // job-startup path, both before any threads that read it.
    unsafe { std::env::set_var("HOME", home_dir) };

    let mut bound: Vec<TcpSocket> = Vec::new();
    let mut number = None;

    for display_num in config.display_offset..config.max_displays {
        let Some(port) = config.base_port.checked_add(display_num) else {
            break;
        };
        let addrs = resolve_bind_addrs(port, config).await?;

        for (i, addr) in addrs.iter().enumerate() {
            let socket = TcpSocket::new_v4()?;
            let _ = socket.set_reuseaddr(true);

            match socket.bind(*addr) {
                Ok(()) => {
                    bound.push(socket);
                    if !config.localhost_only || bound.len() == config.max_listeners {
                        break;
                    }
                }
                Err(e) => {
                    debug!(display = display_num, port, %addr, error = %e, "bind failed");
                    if i + 1 == addrs.len() {
                        // Last address for this display: close anything
                        // already bound, the display is all-or-nothing.
                        bound.clear();
                    }
                }
            }
        }

        if !bound.is_empty() {
            number = Some(display_num);
            break;
        }
    }

    let Some(number) = number else {
        warn!(
            first = config.display_offset,
            last = config.max_displays,
            "no free X11 display in range"
        );
        return Err(Error::DisplayExhausted {
            first: config.display_offset,
            last: config.max_displays,
        });
    };

    let listeners = activate_listeners(bound, number, config.backlog)?;

    let display_str = format!("localhost:{}.{}", number, auth.screen);
    info!(
        display = %display_str,
        listeners = listeners.len(),
        "allocated X11 display"
    );

    Ok(X11Display {
        number,
        display: display_str,
        listeners,
    })
}

/// Candidate bind addresses for one display's port. An explicit list
/// from the config takes precedence; otherwise wildcard IPv4 normally,
/// loopback-resolved IPv4 addresses in localhost-only mode. Non-IPv4
/// results are skipped, not treated as failures.
async fn resolve_bind_addrs(port: u16, config: &X11DisplayConfig) -> Result<Vec<SocketAddr>> {
    if let Some(addrs) = &config.bind_addrs {
        return Ok(addrs
            .iter()
            .filter(|addr| addr.is_ipv4())
            .map(|addr| SocketAddr::new(*addr, port))
            .collect());
    }
    if config.localhost_only {
        let addrs = lookup_host(("localhost", port)).await?;
        Ok(addrs.filter(SocketAddr::is_ipv4).collect())
    } else {
        Ok(vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))])
    }
}

/// Transition the winning display's bound sockets to listening state.
///
/// Any listen failure fails the whole display: the entire set, bound
/// and already-listening sockets alike, is dropped before the error
/// returns, so no listener can outlive a failed allocation.
fn activate_listeners(bound: Vec<TcpSocket>, display_num: u16, backlog: u32) -> Result<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(bound.len());
    for socket in bound {
        match socket.listen(backlog) {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                warn!(display = display_num, error = %e, "listen failed, closing X11 listener set");
                return Err(e.into());
            }
        }
    }
    Ok(listeners)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: &str = "/tmp";

    fn loopback_config(base_port: u16, displays: std::ops::Range<u16>) -> X11DisplayConfig {
        X11DisplayConfig {
            display_offset: displays.start,
            max_displays: displays.end,
            base_port,
            localhost_only: true,
            ..X11DisplayConfig::default()
        }
    }

    /// Find a base port with `len` consecutive free loopback ports
    /// above it, holding none of them. Racy against other processes,
    /// but the search space makes collisions unlikely.
    fn free_port_run(start: u16, len: u16) -> u16 {
        let mut base = 21000 + (std::process::id() % 997) as u16;
        loop {
            let all_free = (start..start + len).all(|off| {
                std::net::TcpListener::bind(("127.0.0.1", base + off)).is_ok()
            });
            if all_free {
                return base;
            }
            base += len;
        }
    }

    #[test]
    fn auth_spec_parses_three_fields() {
        let spec: X11AuthSpec = "MIT-MAGIC-COOKIE-1:a1b2c3d4:0".parse().unwrap();
        assert_eq!(spec.protocol, "MIT-MAGIC-COOKIE-1");
        assert_eq!(spec.hex_data, "a1b2c3d4");
        assert_eq!(spec.screen, 0);
    }

    #[test]
    fn auth_spec_rejects_wrong_arity() {
        assert!("x11".parse::<X11AuthSpec>().is_err());
        assert!("proto:data".parse::<X11AuthSpec>().is_err());
        assert!("proto:data:0:extra".parse::<X11AuthSpec>().is_err());
    }

    #[test]
    fn auth_spec_rejects_bad_screen() {
        assert!("proto:data:banana".parse::<X11AuthSpec>().is_err());
        assert!("proto:data:".parse::<X11AuthSpec>().is_err());
    }

    #[tokio::test]
    async fn malformed_auth_spec_fails_before_binding() {
        let config = loopback_config(6000, 50..51);
        let err = init_x11_display(Path::new(HOME), "x11", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn scan_skips_occupied_displays() {
        let base = free_port_run(10, 4);

        // Occupy displays 10..13; display 13 stays free.
        let _holders: Vec<_> = (10..13)
            .map(|off| std::net::TcpListener::bind(("127.0.0.1", base + off)).unwrap())
            .collect();

        let config = loopback_config(base, 10..20);
        let display = init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:0", &config)
            .await
            .unwrap();

        assert_eq!(display.number, 13);
        assert_eq!(display.display, format!("localhost:{}.0", 13));
        assert!(!display.listeners.is_empty());
    }

    #[tokio::test]
    async fn display_string_carries_screen_number() {
        let base = free_port_run(10, 1);
        let config = loopback_config(base, 10..11);

        let display = init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:7", &config)
            .await
            .unwrap();
        assert_eq!(display.display, format!("localhost:{}.7", display.number));
    }

    #[tokio::test]
    async fn exhausted_range_is_an_error() {
        let base = free_port_run(10, 1);
        let _holder = std::net::TcpListener::bind(("127.0.0.1", base + 10)).unwrap();

        let config = loopback_config(base, 10..11);
        let err = init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:0", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DisplayExhausted { first: 10, last: 11 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn last_address_bind_failure_abandons_whole_display() {
        let base = free_port_run(10, 2);

        // Hold the second candidate address of display 10; the first
        // stays free, so the display binds partially and must be
        // abandoned as a whole.
        let _blocker = std::net::TcpListener::bind(("127.0.0.2", base + 10)).unwrap();

        let mut config = loopback_config(base, 10..12);
        config.bind_addrs = Some(vec![
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)),
        ]);

        let display = init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:0", &config)
            .await
            .unwrap();

        assert_eq!(display.number, 11);
        assert_eq!(display.listeners.len(), 2);

        // The partial bind on display 10 was released with the display.
        std::net::TcpListener::bind(("127.0.0.1", base + 10)).unwrap();
    }

    #[tokio::test]
    async fn listen_failure_releases_every_bound_socket() {
        let base = free_port_run(10, 1);
        let port = base + 10;

        let good = TcpSocket::new_v4().unwrap();
        good.set_reuseaddr(true).unwrap();
        good.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
            .unwrap();

        // An already-connected socket cannot enter listening state.
        let acceptor = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let stream = std::net::TcpStream::connect(acceptor.local_addr().unwrap()).unwrap();
        stream.set_nonblocking(true).unwrap();
        let bad = TcpSocket::from_std_stream(stream);

        let err = activate_listeners(vec![good, bad], 10, X11_LISTEN_BACKLOG).unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        // The socket that listened before the failure went down with
        // the set: its port is bindable again.
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[tokio::test]
    async fn allocated_listeners_accept_connections() {
        let base = free_port_run(10, 1);
        let config = loopback_config(base, 10..11);

        let display = init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:0", &config)
            .await
            .unwrap();

        let port = base + display.number;
        let connect = tokio::spawn(async move {
            tokio::net::TcpStream::connect(("127.0.0.1", port)).await
        });
        let (_sock, _addr) = display.listeners[0].accept().await.unwrap();
        connect.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn home_is_exported_for_xauthority() {
        let base = free_port_run(10, 1);
        let config = loopback_config(base, 10..11);

        init_x11_display(Path::new(HOME), "MIT-MAGIC-COOKIE-1:deadbeef:0", &config)
            .await
            .unwrap();
        assert_eq!(std::env::var("HOME").unwrap(), HOME);
    }
}
