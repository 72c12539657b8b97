//! Protocol errors

use thiserror::Error;

/// Errors that can occur during communication with a rotary valve
///
/// Errors are `Clone` so that a single failure can be delivered to every
/// caller waiting on the session when it fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed payload: {0:?}")]
    MalformedPayload(String),

    #[error("Received a frame with no pending request: {0:?}")]
    UnexpectedFrame(String),

    #[error("Session is not open")]
    SessionClosed,

    #[error("Session already opened")]
    AlreadyOpen,

    #[error("Session is already closing")]
    AlreadyClosing,

    #[error("Session already closed")]
    AlreadyClosed,

    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ProtocolError>),
}

impl ProtocolError {
    /// Whether this error means the device could not be reached at all.
    ///
    /// Callers enumerating several devices skip these and keep going.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ProtocolError::ConnectionFailed(_))
    }

    /// Whether this error leaves the session permanently unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::LinkLost(_)
                | ProtocolError::Timeout
                | ProtocolError::MalformedFrame(_)
                | ProtocolError::UnexpectedFrame(_)
        )
    }

    /// Combine two errors, flattening nested aggregates.
    pub fn combine(self, other: ProtocolError) -> ProtocolError {
        let mut errors = match self {
            ProtocolError::Multiple(errors) => errors,
            e => vec![e],
        };
        match other {
            ProtocolError::Multiple(more) => errors.extend(more),
            e => errors.push(e),
        }
        ProtocolError::Multiple(errors)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::LinkLost(e.to_string())
    }
}

impl From<tokio_serial::Error> for ProtocolError {
    fn from(e: tokio_serial::Error) -> Self {
        ProtocolError::ConnectionFailed(e.to_string())
    }
}

fn join_errors(errors: &[ProtocolError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_link_lost() {
        let err: ProtocolError =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(matches!(err, ProtocolError::LinkLost(_)));
        assert!(err.is_fatal());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_only_connection_failures_are_skippable() {
        assert!(ProtocolError::ConnectionFailed("no such port".into()).is_connection_error());
        assert!(!ProtocolError::Timeout.is_connection_error());
        assert!(!ProtocolError::SessionClosed.is_connection_error());
    }

    #[test]
    fn test_combine_flattens() {
        let err = ProtocolError::Timeout
            .combine(ProtocolError::SessionClosed)
            .combine(ProtocolError::Multiple(vec![ProtocolError::AlreadyClosed]));

        assert_eq!(
            err,
            ProtocolError::Multiple(vec![
                ProtocolError::Timeout,
                ProtocolError::SessionClosed,
                ProtocolError::AlreadyClosed,
            ])
        );
        assert_eq!(
            err.to_string(),
            "3 errors occurred: Response timeout; Session is not open; Session already closed"
        );
    }
}
