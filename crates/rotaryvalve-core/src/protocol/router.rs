//! Response routing
//!
//! The router is the only reader of the link. Each decoded frame goes to
//! exactly one waiter: the pending motion when the valve goes from busy to
//! idle, otherwise the oldest pending query.

use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::debug;

use super::{codec::FrameCodec, session::Inner, Frame, ProtocolError};

/// Read frames until the link fails or the session stops the router
pub(super) async fn route_frames<R>(inner: Arc<Inner>, mut frames: FramedRead<R, FrameCodec>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let error = loop {
        tokio::select! {
            biased;

            _ = inner.stop.cancelled() => {
                debug!("router stopped");
                inner.release_all(ProtocolError::SessionClosed);
                return;
            }

            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    if let Err(e) = inner.dispatch(frame) {
                        break e;
                    }
                }
                Some(Err(e)) => break e,
                None => break ProtocolError::LinkLost("link closed by peer".to_string()),
            },
        }
    };

    inner.fail(error);
}

impl Inner {
    /// Deliver one frame to its waiter
    pub(super) fn dispatch(&self, frame: Frame) -> Result<(), ProtocolError> {
        let mut shared = self.lock();
        let was_busy = shared.busy;
        shared.busy = frame.is_busy();

        debug!(
            status = frame.status,
            busy = shared.busy,
            payload = %frame.payload,
            "received frame"
        );

        if was_busy && !shared.busy {
            if let Some(motion) = shared.motion.take() {
                drop(shared);
                motion.resolve(Ok(frame));
                return Ok(());
            }
        }

        match shared.queries.pop_front() {
            Some(query) => {
                drop(shared);
                query.resolve(Ok(frame));
                Ok(())
            }
            None => Err(ProtocolError::UnexpectedFrame(frame.payload)),
        }
    }
}
