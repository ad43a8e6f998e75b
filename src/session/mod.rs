//! Per-connection session lifecycle
//!
//! The [`SessionManager`] is the single authority over the active-session
//! set. Each session owns exactly one [`CameraSource`]; every path out of a
//! session, including failed creation, releases that source exactly once.
//!
//! State machine: `Negotiating -> Active -> Closing -> Closed`. A session is
//! removed from the set before it starts closing, so only one caller can
//! ever tear it down.

pub mod transport;

pub use transport::{
    MediaTransport, PeerLink, SdpType, SessionDescription, TransportEvents, TransportState,
    VideoSink,
};

use crate::camera::{CameraSource, CameraSourceFactory, DeviceInterrupt};
use crate::errors::{CameraError, SessionError};
use crate::types::{CameraBackend, CameraConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opaque session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Active,
    Closing,
    Closed,
}

/// Snapshot of one tracked session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub backend: CameraBackend,
    pub created_at: DateTime<Utc>,
}

/// Events delivered to the manager's event loop
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transport { id: SessionId, state: TransportState },
    SourceLost(SessionId),
}

type SharedSource = Arc<Mutex<CameraSource>>;

/// How long a camera release may block before the session gives up on it
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock a std mutex, recovering the data if a capture worker panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Session {
    id: SessionId,
    backend: CameraBackend,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    source: SharedSource,
    /// Unblocks a capture worker parked in a device read
    interrupt: Option<Arc<dyn DeviceInterrupt>>,
    peer: Box<dyn PeerLink>,
    stop: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// Move to `to` only if currently in `from`
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state(),
            backend: self.backend,
            created_at: self.created_at,
        }
    }
}

/// Owns the active sessions and binds each to a camera source and a peer.
pub struct SessionManager {
    config: CameraConfig,
    factory: CameraSourceFactory,
    transport: Arc<dyn MediaTransport>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    shutting_down: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Create the manager and start its event loop. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: CameraConfig,
        factory: CameraSourceFactory,
        transport: Arc<dyn MediaTransport>,
    ) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            config,
            factory,
            transport,
            sessions: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            events,
        });
        tokio::spawn(run_events(Arc::downgrade(&manager), rx));
        manager
    }

    /// Camera configuration used when a request carries none
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn create_session(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, SessionError> {
        self.create_session_with(offer, self.config.clone()).await
    }

    /// Create a session whose camera is built from `config`.
    ///
    /// The camera is opened and attached before negotiation starts, so the
    /// answer reflects the real track. Returns the local answer.
    pub async fn create_session_with(
        &self,
        offer: SessionDescription,
        config: CameraConfig,
    ) -> Result<SessionDescription, SessionError> {
        if self.is_shutting_down() {
            return Err(SessionError::ShuttingDown);
        }
        if offer.sdp_type != SdpType::Offer {
            return Err(SessionError::InvalidOffer(format!(
                "expected an offer, got {:?}",
                offer.sdp_type
            )));
        }
        if offer.sdp.trim().is_empty() {
            return Err(SessionError::InvalidOffer("offer SDP is empty".to_string()));
        }

        let factory = self.factory.clone();
        let source = tokio::task::spawn_blocking(move || factory.build(&config))
            .await
            .map_err(|e| SessionError::Internal(format!("camera worker failed: {}", e)))??;

        let backend = source.backend();
        let source_config = source.config().clone();
        let description = source.describe();
        let interrupt = source.interrupt_handle();
        let source: SharedSource = Arc::new(Mutex::new(source));

        let id = SessionId::new();
        let events = TransportEvents::new(id, self.events.clone());

        let peer = match self.transport.open_peer(id, events).await {
            Ok(peer) => peer,
            Err(e) => {
                close_source(&source).await;
                return Err(e);
            }
        };

        let sink = match peer.add_video_track(&source_config).await {
            Ok(sink) => sink,
            Err(e) => {
                peer.close().await;
                close_source(&source).await;
                return Err(e);
            }
        };

        let session = Arc::new(Session {
            id,
            backend,
            created_at: Utc::now(),
            state: Mutex::new(SessionState::Negotiating),
            source,
            interrupt,
            peer,
            stop: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        });

        {
            let mut sessions = self.sessions.write().await;
            if self.is_shutting_down() {
                drop(sessions);
                self.close_session(session, "shutdown during creation").await;
                return Err(SessionError::ShuttingDown);
            }
            sessions.insert(id, session.clone());
        }
        log::info!("Session {} negotiating with {}", id, description);

        let answer = match session.peer.negotiate(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("Session {} negotiation failed: {}", id, e);
                self.teardown(id, "negotiation failed").await;
                return Err(e);
            }
        };

        if !session.transition(SessionState::Negotiating, SessionState::Active) {
            return Err(SessionError::Negotiation(format!(
                "session {} closed during negotiation",
                id
            )));
        }

        let pump = tokio::spawn(run_pump(
            id,
            session.source.clone(),
            sink,
            session.stop.clone(),
            self.events.clone(),
        ));
        *lock(&session.pump) = Some(pump);

        log::info!("Session {} active", id);
        Ok(answer)
    }

    /// Apply a transport state change. Terminal states tear the session down.
    pub async fn on_state_change(&self, id: SessionId, state: TransportState) {
        if state.is_terminal() {
            log::info!("Session {} transport {:?}", id, state);
            self.teardown(id, "transport ended").await;
        } else {
            log::debug!("Session {} transport {:?}", id, state);
        }
    }

    /// Remove and close one session. Returns false if it was already gone.
    pub async fn teardown(&self, id: SessionId, reason: &str) -> bool {
        let removed = self.sessions.write().await.remove(&id);
        match removed {
            Some(session) => {
                self.close_session(session, reason).await;
                true
            }
            None => false,
        }
    }

    async fn close_session(&self, session: Arc<Session>, reason: &str) {
        session.set_state(SessionState::Closing);
        log::info!("Closing session {} ({})", session.id, reason);

        session.stop.store(true, Ordering::SeqCst);
        let pump = lock(&session.pump).take();
        if let Some(pump) = pump {
            pump.abort();
        }
        // The aborted pump may still have a worker blocked in a read that
        // holds the source lock
        if let Some(interrupt) = &session.interrupt {
            interrupt.interrupt();
        }

        session.peer.close().await;
        if tokio::time::timeout(RELEASE_TIMEOUT, close_source(&session.source))
            .await
            .is_err()
        {
            log::error!(
                "Session {} camera release still blocked after {:?}",
                session.id,
                RELEASE_TIMEOUT
            );
        }

        session.set_state(SessionState::Closed);
        log::info!("Session {} closed", session.id);
    }

    /// Close every session concurrently and reject new offers.
    pub async fn shutdown_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        if drained.is_empty() {
            return;
        }

        log::info!("Shutting down {} session(s)", drained.len());
        futures::future::join_all(
            drained
                .into_iter()
                .map(|session| self.close_session(session, "shutdown")),
        )
        .await;
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.read().await.get(&id).map(|s| s.state())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.read().await.values().map(|s| s.info()).collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Transport { id, state } => self.on_state_change(id, state).await,
            SessionEvent::SourceLost(id) => {
                self.teardown(id, "camera lost").await;
            }
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

async fn run_events(manager: Weak<SessionManager>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        tokio::spawn(async move { manager.handle_event(event).await });
    }
}

async fn close_source(source: &SharedSource) {
    let source = source.clone();
    let released = tokio::task::spawn_blocking(move || {
        let mut source = lock(&source);
        source.close();
    })
    .await;
    if let Err(e) = released {
        log::error!("Camera release worker failed: {}", e);
    }
}

/// Move frames from the source to the sink until stopped or the camera is lost
async fn run_pump(
    id: SessionId,
    source: SharedSource,
    mut sink: Box<dyn VideoSink>,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut delivered: u64 = 0;
    while !stop.load(Ordering::SeqCst) {
        let worker = source.clone();
        let next = tokio::task::spawn_blocking(move || {
            let mut source = lock(&worker);
            source.next_frame()
        })
        .await;

        match next {
            Ok(Ok(frame)) => {
                if let Err(e) = sink.write_frame(frame).await {
                    log::debug!("Session {} dropped a frame: {}", id, e);
                }
                delivered += 1;
            }
            Ok(Err(CameraError::DeviceLost(reason))) => {
                log::error!("Session {} lost its camera: {}", id, reason);
                let _ = events.send(SessionEvent::SourceLost(id));
                break;
            }
            Ok(Err(CameraError::SourceClosed)) => break,
            Ok(Err(e)) => {
                log::warn!("Session {} frame pump stopped: {}", id, e);
                let _ = events.send(SessionEvent::SourceLost(id));
                break;
            }
            Err(e) => {
                log::error!("Session {} capture worker failed: {}", id, e);
                let _ = events.send(SessionEvent::SourceLost(id));
                break;
            }
        }
    }
    log::debug!("Session {} frame pump finished after {} frames", id, delivered);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_session_state_json() {
        assert_eq!(
            serde_json::to_value(SessionState::Negotiating).unwrap(),
            "negotiating"
        );
        assert_eq!(serde_json::to_value(SessionState::Closed).unwrap(), "closed");
    }
}
