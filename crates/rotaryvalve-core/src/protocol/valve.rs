//! Rotary valve operations

use std::time::Duration;

use super::{
    codec::{parse_payload, PayloadKind, Value},
    Command, ProtocolError, Session,
};

impl Session {
    /// Unique identifier of the valve
    pub async fn unique_id(&self) -> Result<String, ProtocolError> {
        self.query(&Command::GetUniqueId.wire_text()).await
    }

    /// Current valve position, starting at 1
    ///
    /// Returns `None` if the valve has not been homed since power-on.
    pub async fn valve(&self) -> Result<Option<u32>, ProtocolError> {
        let position: u32 = self.query(&Command::GetValve.wire_text()).await?;
        Ok((position != 0).then_some(position))
    }

    /// Number of valve positions
    pub async fn valve_count(&self) -> Result<u32, ProtocolError> {
        self.query(&Command::GetValveCount.wire_text()).await
    }

    /// Initialize the valve
    ///
    /// Must be done after every power-on. Homing an initialized valve homes it again.
    pub async fn home(&self) -> Result<(), ProtocolError> {
        self.execute(Command::Home).await
    }

    /// Rotate to a valve position, starting at 1
    ///
    /// Rotating to the current position performs a full revolution; check
    /// [`Session::valve`] first to avoid it.
    pub async fn rotate(&self, valve: u32) -> Result<(), ProtocolError> {
        self.execute(Command::Rotate(valve)).await
    }

    /// Make the valve hold for `delay`, with millisecond resolution
    pub async fn wait(&self, delay: Duration) -> Result<(), ProtocolError> {
        self.execute(Command::wait(delay)).await
    }

    /// Run a motion command, or query a non-motion command and discard its payload
    pub async fn execute(&self, command: Command) -> Result<(), ProtocolError> {
        let text = command.wire_text();
        if command.is_motion() {
            self.run(&text).await
        } else {
            self.query::<String>(&text).await.map(|_| ())
        }
    }

    /// Send an arbitrary query and parse its payload as `kind`
    pub async fn query_value(
        &self,
        command: &str,
        kind: PayloadKind,
    ) -> Result<Value, ProtocolError> {
        let payload: String = self.query(command).await?;
        parse_payload(&payload, kind)
    }
}
