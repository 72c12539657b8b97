//! Protocol commands
//!
//! Defines the commands understood by the rotary valve.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Commands sent to the rotary valve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query the unique identifier ('?9000')
    GetUniqueId,

    /// Query the current valve position ('?6')
    GetValve,

    /// Query the number of valve positions ('?801')
    GetValveCount,

    /// Initialize the valve ('ZR')
    Home,

    /// Rotate to a 1-based valve position ('b{n}R')
    Rotate(u32),

    /// Hold for a number of milliseconds ('M{ms}R')
    Wait(u64),
}

impl Command {
    /// Build a wait command, rounding the delay to the nearest millisecond
    pub fn wait(delay: Duration) -> Self {
        Command::Wait((delay.as_secs_f64() * 1000.0).round() as u64)
    }

    /// Command text as written between the frame prefix and terminator
    pub fn wire_text(&self) -> String {
        match self {
            Command::GetUniqueId => "?9000".to_string(),
            Command::GetValve => "?6".to_string(),
            Command::GetValveCount => "?801".to_string(),
            Command::Home => "ZR".to_string(),
            Command::Rotate(valve) => format!("b{}R", valve),
            Command::Wait(ms) => format!("M{}R", ms),
        }
    }

    /// Whether completion is signaled by the busy bit rather than the acknowledgement
    pub fn is_motion(&self) -> bool {
        matches!(self, Command::Home | Command::Rotate(_) | Command::Wait(_))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_text() {
        assert_eq!(Command::GetUniqueId.wire_text(), "?9000");
        assert_eq!(Command::GetValve.wire_text(), "?6");
        assert_eq!(Command::GetValveCount.wire_text(), "?801");
        assert_eq!(Command::Home.wire_text(), "ZR");
        assert_eq!(Command::Rotate(3).wire_text(), "b3R");
        assert_eq!(Command::Wait(1500).to_string(), "M1500R");
    }

    #[test]
    fn test_wait_rounds_to_millis() {
        assert_eq!(Command::wait(Duration::from_secs_f64(1.5)), Command::Wait(1500));
        assert_eq!(Command::wait(Duration::from_micros(2600)), Command::Wait(3));
        assert_eq!(Command::wait(Duration::from_micros(2400)), Command::Wait(2));
        assert_eq!(Command::wait(Duration::ZERO), Command::Wait(0));
    }

    #[test]
    fn test_motion_commands() {
        assert!(Command::Home.is_motion());
        assert!(Command::Rotate(1).is_motion());
        assert!(Command::Wait(10).is_motion());
        assert!(!Command::GetValve.is_motion());
        assert!(!Command::GetUniqueId.is_motion());
    }
}
