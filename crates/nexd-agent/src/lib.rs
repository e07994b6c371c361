//! nexd-agent: the interactive-job I/O bridge of the nexd execution agent.
//!
//! When a user submits an interactive job, the submission client opens a
//! terminal session; this crate attaches the job's PTY to the secure
//! channel back to the submission host and relays terminal traffic for
//! the session lifetime. It provides:
//!
//! - PTY termios/window-size configuration ([`pty`])
//! - The bidirectional relay pumps ([`relay`])
//! - The session driver tying handshake and relay together ([`session`])
//! - The outbound connector to the submission host ([`connect`])
//! - X11 display allocation for jobs requesting X forwarding ([`x11`])
//!
//! Job scheduling, shell spawning, and channel encryption live in
//! external components; this crate only consumes an already-secured
//! byte channel and an already-opened PTY master.

pub mod connect;
pub mod pty;
pub mod relay;
pub mod session;
pub mod x11;

pub use connect::{AuthRole, SubmitterConnection, connect_to_submitter};
pub use pty::Pty;
pub use relay::{CancelFlag, PumpOutcome};
pub use session::TerminalSession;
pub use x11::{X11AuthSpec, X11Display, X11DisplayConfig, init_x11_display};
