//! Link abstraction
//!
//! A link is any bidirectional byte stream the session can own: a serial
//! port in production, an in-memory duplex pipe in tests.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

use super::{ProtocolError, BAUD_RATE};

/// Byte stream carrying the valve protocol
pub trait Link: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Link for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Open a serial port with the valve's fixed 9600 8N1 framing
pub fn open_serial(address: &str) -> Result<SerialStream, ProtocolError> {
    debug!(address, baud = BAUD_RATE, "opening serial link");

    let stream = tokio_serial::new(address, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_link<L: Link>(_link: &L) {}

    #[tokio::test]
    async fn test_duplex_is_a_link() {
        let (a, _b) = tokio::io::duplex(64);
        assert_link(&a);
    }

    #[tokio::test]
    async fn test_open_missing_port_is_connection_error() {
        let err = open_serial("/dev/this-port-does-not-exist")
            .err()
            .expect("missing port must not open");
        assert!(err.is_connection_error());
    }
}
