//! Session management
//!
//! A [`Session`] owns one link for its lifetime. Commands are written under a
//! single writer lock while their [`PendingQuery`] is queued, so the queue
//! order is always the wire order and responses can be correlated FIFO
//! without request identifiers. Motion commands additionally hold the motion
//! guard until the valve reports busy→idle.
//!
//! A caller cancelled while waiting for the writer leaves nothing behind.
//! Once registered, the command is written by a detached task, so it either
//! reaches the wire whole or the session is stopped; the registration then
//! stays until the router or teardown resolves it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::{
    codec::{FrameCodec, FromPayload},
    link::{open_serial, Link},
    router::route_frames,
    Frame, ProtocolError, DEFAULT_TIMEOUT_MS,
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, link not opened yet
    Idle,
    /// Link open and router running
    Open,
    /// Teardown in progress
    Closing,
    /// Teardown complete
    Closed,
    /// Link lost or protocol desynchronized; never recovers
    Failed,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial port address
    pub port_name: String,
    /// Response timeout in milliseconds
    pub timeout_ms: u64,
}

impl SessionConfig {
    /// Configuration for the given port with the default timeout
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Response timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

type LinkWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

type Reply = oneshot::Sender<Result<Frame, ProtocolError>>;

/// A query waiting for its response frame
pub(super) struct PendingQuery {
    id: u64,
    reply: Reply,
}

impl PendingQuery {
    /// Consumes the placeholder, so it can only ever be resolved once.
    /// A dropped receiver means the caller was cancelled; the result is discarded.
    pub(super) fn resolve(self, result: Result<Frame, ProtocolError>) {
        let _ = self.reply.send(result);
    }
}

/// Reply slot and guard of a motion command not yet registered
struct MotionSlot {
    reply: Reply,
    guard: OwnedMutexGuard<()>,
}

/// A motion command waiting for the busy→idle transition
///
/// Holds the motion guard, so the next motion command cannot start until
/// this one is resolved, even if its caller went away.
pub(super) struct PendingMotion {
    id: u64,
    reply: Reply,
    _guard: OwnedMutexGuard<()>,
}

impl PendingMotion {
    pub(super) fn resolve(self, result: Result<Frame, ProtocolError>) {
        let _ = self.reply.send(result);
    }
}

/// State shared by the coordinator, the router and the lifecycle
pub(super) struct Shared {
    pub(super) state: SessionState,
    pub(super) busy: bool,
    pub(super) queries: VecDeque<PendingQuery>,
    pub(super) motion: Option<PendingMotion>,
    failure: Option<ProtocolError>,
    next_id: u64,
    router: Option<JoinHandle<()>>,
}

impl Shared {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_waiters(&mut self) -> (VecDeque<PendingQuery>, Option<PendingMotion>) {
        (std::mem::take(&mut self.queries), self.motion.take())
    }
}

pub(super) struct Inner {
    config: SessionConfig,
    shared: Mutex<Shared>,
    writer: Arc<AsyncMutex<Option<LinkWriter>>>,
    motion_lock: Arc<AsyncMutex<()>>,
    pub(super) stop: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

impl Inner {
    pub(super) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, shared: &mut Shared, state: SessionState) {
        if shared.state != state {
            info!(port = %self.config.port_name, from = ?shared.state, to = ?state, "session state change");
            shared.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Enter the failed state and release every waiter with `error`
    pub(super) fn fail(&self, error: ProtocolError) {
        let (queries, motion) = {
            let mut shared = self.lock();
            if matches!(shared.state, SessionState::Open | SessionState::Closing) {
                warn!(port = %self.config.port_name, %error, "session failed");
                shared.failure = Some(error.clone());
                self.set_state(&mut shared, SessionState::Failed);
            }
            shared.take_waiters()
        };

        self.stop.cancel();
        release(queries, motion, &error);
    }

    /// Release every waiter with `error` without changing state
    pub(super) fn release_all(&self, error: ProtocolError) {
        let (queries, motion) = self.lock().take_waiters();
        release(queries, motion, &error);
    }

    /// Drop the query and motion registered under `id`, releasing the motion guard
    fn withdraw(&self, id: u64) {
        let motion = {
            let mut shared = self.lock();
            if let Some(index) = shared.queries.iter().position(|q| q.id == id) {
                shared.queries.remove(index);
            }
            match shared.motion.as_ref() {
                Some(m) if m.id == id => shared.motion.take(),
                _ => None,
            }
        };
        drop(motion);
    }

    /// Write one registered command, giving up if the session stops first
    async fn write_command(
        self: Arc<Self>,
        mut writer: OwnedMutexGuard<Option<LinkWriter>>,
        id: u64,
        command: String,
    ) -> Result<(), ProtocolError> {
        let Some(link) = writer.as_mut() else {
            self.withdraw(id);
            return Err(ProtocolError::SessionClosed);
        };

        debug!(port = %self.config.port_name, id, %command, "sending command");
        let sent = tokio::select! {
            biased;

            _ = self.stop.cancelled() => None,
            result = link.send(command.as_str()) => Some(result),
        };

        match sent {
            Some(Ok(())) => Ok(()),
            None => {
                debug!(port = %self.config.port_name, id, "write interrupted by shutdown");
                self.withdraw(id);
                Err(ProtocolError::SessionClosed)
            }
            Some(Err(error)) => {
                self.withdraw(id);
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    async fn teardown(self: Arc<Self>) -> Result<(), ProtocolError> {
        self.stop.cancel();

        let router = self.lock().router.take();
        if let Some(router) = router {
            if let Err(e) = router.await {
                warn!(port = %self.config.port_name, "router task ended abnormally: {}", e);
            }
        }

        // The router releases its waiters on exit; this covers a router that panicked
        self.release_all(ProtocolError::SessionClosed);

        // Any in-flight write observed the stop token and released the writer
        let link_healthy = self.lock().failure.is_none();
        let result = match self.writer.lock().await.take() {
            Some(mut writer) => {
                match tokio::time::timeout(self.config.timeout(), writer.get_mut().shutdown()).await
                {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) if link_healthy => Err(ProtocolError::from(e)),
                    Ok(Err(e)) => {
                        debug!(port = %self.config.port_name, "ignoring shutdown error on failed link: {}", e);
                        Ok(())
                    }
                    Err(_) => {
                        warn!(port = %self.config.port_name, "link did not shut down in time");
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        let mut shared = self.lock();
        self.set_state(&mut shared, SessionState::Closed);
        result
    }
}

fn release(
    queries: VecDeque<PendingQuery>,
    motion: Option<PendingMotion>,
    error: &ProtocolError,
) {
    if !queries.is_empty() || motion.is_some() {
        debug!(
            queries = queries.len(),
            motion = motion.is_some(),
            %error,
            "releasing pending waiters"
        );
    }
    if let Some(motion) = motion {
        motion.resolve(Err(error.clone()));
    }
    for query in queries {
        query.resolve(Err(error.clone()));
    }
}

/// Protocol session with one rotary valve
///
/// Cloning yields another handle to the same session. When the last handle
/// is dropped without closing, the router is stopped and pending waiters are
/// released.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
    _stop_on_drop: Arc<DropGuard>,
}

impl Session {
    /// Create a session in the `Idle` state
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let stop = CancellationToken::new();
        let inner = Inner {
            config,
            shared: Mutex::new(Shared {
                state: SessionState::Idle,
                busy: false,
                queries: VecDeque::new(),
                motion: None,
                failure: None,
                next_id: 0,
                router: None,
            }),
            writer: Arc::new(AsyncMutex::new(None)),
            motion_lock: Arc::new(AsyncMutex::new(())),
            stop: stop.clone(),
            state_tx,
        };

        Self {
            inner: Arc::new(inner),
            _stop_on_drop: Arc::new(stop.drop_guard()),
        }
    }

    /// Create a session for `address` and open it
    pub async fn connect(address: &str) -> Result<Self, ProtocolError> {
        let session = Self::new(SessionConfig::new(address));
        session.open().await?;
        Ok(session)
    }

    /// Open the configured serial port and start the router
    pub async fn open(&self) -> Result<(), ProtocolError> {
        if self.state() != SessionState::Idle {
            return Err(ProtocolError::AlreadyOpen);
        }
        let link = open_serial(&self.inner.config.port_name)?;
        self.attach(link)
    }

    /// Take ownership of an already opened link and start the router
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<L: Link>(&self, link: L) -> Result<(), ProtocolError> {
        let mut shared = self.inner.lock();
        if shared.state != SessionState::Idle {
            return Err(ProtocolError::AlreadyOpen);
        }

        let (reader, writer) = tokio::io::split(link);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        *self
            .inner
            .writer
            .try_lock()
            .map_err(|_| ProtocolError::AlreadyOpen)? = Some(FramedWrite::new(writer, FrameCodec));

        shared.router = Some(tokio::spawn(route_frames(
            self.inner.clone(),
            FramedRead::new(reader, FrameCodec),
        )));
        self.inner.set_state(&mut shared, SessionState::Open);
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Serial port address this session was configured with
    pub fn address(&self) -> &str {
        &self.inner.config.port_name
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The error that failed the session, if any
    pub fn failure(&self) -> Option<ProtocolError> {
        self.inner.lock().failure.clone()
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        match self.state() {
            SessionState::Open => Ok(()),
            _ => Err(ProtocolError::SessionClosed),
        }
    }

    /// Send a command and parse its acknowledgement payload as `T`
    pub async fn query<T: FromPayload>(&self, command: &str) -> Result<T, ProtocolError> {
        let frame = self.request(command, None).await?;
        T::from_payload(&frame.payload)
    }

    /// Send a command and wait for its response frame
    async fn request(
        &self,
        command: &str,
        motion: Option<MotionSlot>,
    ) -> Result<Frame, ProtocolError> {
        self.ensure_open()?;

        let (reply, response) = oneshot::channel();
        self.send_query(command, reply, motion).await?;

        match tokio::time::timeout(self.inner.config.timeout(), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::SessionClosed),
            Err(_) => {
                warn!(port = %self.address(), command, "no response within {:?}", self.inner.config.timeout());
                self.inner.fail(ProtocolError::Timeout);
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Queue a query and write its command as one step with respect to other writers
    ///
    /// A motion slot is registered together with its query, so it exists only
    /// for commands that are being written.
    async fn send_query(
        &self,
        command: &str,
        reply: Reply,
        motion: Option<MotionSlot>,
    ) -> Result<(), ProtocolError> {
        let writer = self.inner.writer.clone().lock_owned().await;

        let id = {
            let mut shared = self.inner.lock();
            if shared.state != SessionState::Open {
                return Err(ProtocolError::SessionClosed);
            }
            let id = shared.allocate_id();
            shared.queries.push_back(PendingQuery { id, reply });
            if let Some(MotionSlot { reply, guard }) = motion {
                shared.motion = Some(PendingMotion {
                    id,
                    reply,
                    _guard: guard,
                });
            }
            id
        };

        tokio::spawn(self.inner.clone().write_command(writer, id, command.to_string()))
            .await
            .map_err(|e| ProtocolError::LinkLost(format!("write task failed: {}", e)))?
    }

    /// Send a motion command and wait until the valve reports it finished
    ///
    /// Motion commands are serialized: a second call waits for the first to
    /// complete before anything is written.
    pub async fn run(&self, command: &str) -> Result<(), ProtocolError> {
        self.ensure_open()?;

        let guard = self.inner.motion_lock.clone().lock_owned().await;
        let (reply, completion) = oneshot::channel();

        // The acknowledgement only confirms receipt. A failed request has
        // already withdrawn the motion or released it with the session.
        self.request(command, Some(MotionSlot { reply, guard })).await?;

        match completion.await {
            Ok(result) => result.map(|frame| {
                debug!(port = %self.address(), command, status = frame.status, "motion complete");
            }),
            Err(_) => Err(ProtocolError::SessionClosed),
        }
    }

    /// Close the session
    ///
    /// Stops the router, fails every pending waiter with
    /// [`ProtocolError::SessionClosed`], then closes the link. Teardown runs
    /// on its own task, so it completes even if this future is dropped.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        {
            let mut shared = self.inner.lock();
            match shared.state {
                SessionState::Idle => return Err(ProtocolError::SessionClosed),
                SessionState::Closing => return Err(ProtocolError::AlreadyClosing),
                SessionState::Closed => return Err(ProtocolError::AlreadyClosed),
                SessionState::Open | SessionState::Failed => {
                    self.inner.set_state(&mut shared, SessionState::Closing)
                }
            }
        }

        tokio::spawn(self.inner.clone().teardown())
            .await
            .map_err(|e| ProtocolError::LinkLost(format!("teardown task failed: {}", e)))?
    }

    /// Close the session unless it is already closed or closing
    ///
    /// Waits for an in-flight teardown to finish.
    pub async fn shutdown(&self) -> Result<(), ProtocolError> {
        match self.close().await {
            Ok(()) | Err(ProtocolError::AlreadyClosed) | Err(ProtocolError::SessionClosed) => {
                Ok(())
            }
            Err(ProtocolError::AlreadyClosing) => {
                self.wait_for_state(|s| s == SessionState::Closed).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Wait until the session is closed or fails
    ///
    /// Returns the failure if the link was lost rather than closed explicitly.
    pub async fn closed(&self) -> Result<(), ProtocolError> {
        self.wait_for_state(|s| matches!(s, SessionState::Closed | SessionState::Failed))
            .await;
        match self.failure() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn wait_for_state(&self, done: impl Fn(SessionState) -> bool) {
        let mut states = self.inner.state_tx.subscribe();
        // The sender lives as long as `self`, so this only returns once `done` holds
        let _ = states.wait_for(|s| done(*s)).await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}
