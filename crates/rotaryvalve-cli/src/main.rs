//! RotaryValve command line tool
//!
//! Usage:
//!   rotaryvalve [list] [--all] [--json]
//!   rotaryvalve home <PORT>
//!   rotaryvalve rotate <PORT> <VALVE>
//!   rotaryvalve wait <PORT> <SECONDS>

mod tree;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rotaryvalve_core::protocol::{
    list_ports, list_valve_ports, with_session, ProtocolError, Session,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tree::TreeNode;

#[derive(Debug, Parser)]
#[command(name = "rotaryvalve", version, about = "Inspect and drive rotary selector valves")]
struct Cli {
    /// Increase log verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List connected valves with their identity and position
    List {
        /// Probe every serial port, not only those with the valve's USB ids
        #[arg(long)]
        all: bool,

        /// Print the reports as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },
    /// Initialize a valve
    Home { port: String },
    /// Rotate a valve to a position, starting at 1
    Rotate { port: String, valve: u32 },
    /// Make a valve hold for a number of seconds
    Wait { port: String, seconds: f64 },
}

/// What the list command reports for one valve
#[derive(Debug, Serialize)]
struct DeviceReport {
    address: String,
    unique_id: String,
    valve: Option<u32>,
    valve_count: u32,
}

impl DeviceReport {
    async fn read(session: &Session) -> Result<Self, ProtocolError> {
        let valve = session.valve().await?;
        Ok(Self {
            address: session.address().to_string(),
            unique_id: session.unique_id().await?,
            valve,
            valve_count: session.valve_count().await?,
        })
    }

    fn to_tree(&self) -> TreeNode {
        TreeNode::new(vec![
            "Rotary valve".to_string(),
            format!("Address: {}", self.address),
            format!("Unique id: {}", self.unique_id),
            format!(
                "Current valve: {}",
                self.valve
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<uninitialized>".to_string())
            ),
            format!("Valve count: {}", self.valve_count),
        ])
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn list(all: bool, json: bool) -> Result<()> {
    let ports = if all { list_ports() } else { list_valve_ports() };
    debug!(count = ports.len(), all, "probing ports");

    let mut reports = Vec::new();
    for port in ports {
        let result = with_session(&port.address, |session| async move {
            DeviceReport::read(&session).await
        })
        .await;

        match result {
            Ok(report) => reports.push(report),
            Err(e) if e.is_connection_error() => {
                info!(port = %port.address, "skipping unreachable device: {}", e);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", port.address)),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else if reports.is_empty() {
        println!("No device found.");
    } else {
        let mut root = TreeNode::new(vec![".".to_string()]);
        root.children = reports.iter().map(DeviceReport::to_tree).collect();
        println!("{}", root.render());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command.unwrap_or(Commands::List {
        all: false,
        json: false,
    }) {
        Commands::List { all, json } => list(all, json).await,
        Commands::Home { port } => {
            with_session(&port, |valve| async move { valve.home().await })
                .await
                .with_context(|| format!("Failed to home {}", port))
        }
        Commands::Rotate { port, valve: position } => {
            with_session(&port, |valve| async move { valve.rotate(position).await })
                .await
                .with_context(|| format!("Failed to rotate {} to {}", port, position))
        }
        Commands::Wait { port, seconds } => {
            let delay = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("Invalid delay: {}", seconds))?;
            with_session(&port, |valve| async move { valve.wait(delay).await })
                .await
                .with_context(|| format!("Failed to wait on {}", port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_defaults_to_list() {
        let cli = Cli::parse_from(["rotaryvalve"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_rotate_args() {
        let cli = Cli::parse_from(["rotaryvalve", "-vv", "rotate", "/dev/ttyACM0", "3"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Rotate { port, valve }) => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(valve, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_report_tree_shows_uninitialized() {
        let report = DeviceReport {
            address: "/dev/ttyACM0".to_string(),
            unique_id: "AB1234".to_string(),
            valve: None,
            valve_count: 12,
        };

        assert_eq!(
            report.to_tree().lines,
            vec![
                "Rotary valve",
                "Address: /dev/ttyACM0",
                "Unique id: AB1234",
                "Current valve: <uninitialized>",
                "Valve count: 12",
            ]
        );
    }

    #[test]
    fn test_report_json() {
        let report = DeviceReport {
            address: "/dev/ttyACM0".to_string(),
            unique_id: "AB1234".to_string(),
            valve: Some(3),
            valve_count: 12,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valve"], 3);
        assert_eq!(json["unique_id"], "AB1234");
    }
}
