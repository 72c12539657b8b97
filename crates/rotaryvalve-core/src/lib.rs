//! # RotaryValve Core Library
//!
//! Core functionality for driving rotary selector valves over a serial link.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding/decoding for the valve's line protocol
//! - A session that multiplexes concurrent queries and motion commands
//!   over one serial link
//! - Serial port discovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use rotaryvalve_core::protocol::{with_session, ProtocolError};
//!
//! with_session("/dev/ttyACM0", |valve| async move {
//!     if valve.valve().await?.is_none() {
//!         valve.home().await?;
//!     }
//!     valve.rotate(3).await?;
//!     Ok::<_, ProtocolError>(())
//! })
//! .await?;
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        list_ports, list_valve_ports, scoped, with_session, Command, PortInfo, ProtocolError,
        Session, SessionConfig, SessionState,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
