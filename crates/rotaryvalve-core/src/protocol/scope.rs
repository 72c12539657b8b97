//! Scoped session use
//!
//! [`scoped`] runs a closure against a session and always closes it
//! afterwards, reporting both failures if the closure and the close fail.

use std::future::Future;
use tracing::warn;

use super::{ProtocolError, Session};

/// Closes a session when dropped
///
/// Call [`CloseGuard::close`] to close and observe the result. If the guard
/// is dropped instead (for example because the enclosing future was
/// cancelled), shutdown is scheduled on the current tokio runtime.
pub struct CloseGuard {
    session: Option<Session>,
}

impl CloseGuard {
    /// Guard `session` until closed or dropped
    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Close the session now
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        match self.session.take() {
            Some(session) => session.shutdown().await,
            None => Ok(()),
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.shutdown().await {
                        warn!(port = %session.address(), "deferred close failed: {}", e);
                    }
                });
            }
            Err(_) => warn!(
                port = %session.address(),
                "session dropped outside a runtime; link closes when the last handle is dropped"
            ),
        }
    }
}

/// Run `f` with `session` and close the session on every exit path
///
/// If both `f` and the close fail, the errors are returned together as
/// [`ProtocolError::Multiple`] in that order.
pub async fn scoped<F, Fut, T>(session: Session, f: F) -> Result<T, ProtocolError>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<T, ProtocolError>>,
{
    let guard = CloseGuard::new(session.clone());
    let result = f(session).await;
    let closed = guard.close().await;

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(e), Err(close_error)) => Err(e.combine(close_error)),
    }
}

/// Open the valve at `address`, run `f` with it, and close it
pub async fn with_session<F, Fut, T>(address: &str, f: F) -> Result<T, ProtocolError>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<T, ProtocolError>>,
{
    let session = Session::connect(address).await?;
    scoped(session, f).await
}
