//! Serial Protocol Communication
//!
//! Implements the line-oriented command/response protocol of the rotary
//! valve, including the busy/idle status channel used to detect the end of
//! motion commands.

pub mod codec;
pub mod commands;
mod error;
pub mod link;
mod router;
mod scope;
pub mod serial;
mod session;
mod valve;

pub use codec::{Frame, FrameCodec, FromPayload, PayloadKind, Value};
pub use commands::Command;
pub use error::ProtocolError;
pub use link::{open_serial, Link};
pub use scope::{scoped, with_session, CloseGuard};
pub use serial::{list_ports, list_valve_ports, PortInfo, PortKind};
pub use session::{Session, SessionConfig, SessionState};

/// Baud rate of the valve's serial interface
pub const BAUD_RATE: u32 = 9600;

/// Default timeout for responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Maximum length of a response line
pub const MAX_FRAME_SIZE: usize = 8192;
