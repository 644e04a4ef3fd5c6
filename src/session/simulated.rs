//! In-memory session backend.
//!
//! [`SimulatedConnector`] hands out sessions that never touch the network.
//! Every action is recorded with a timestamp taken from the tokio clock, so
//! the same backend drives `--dry-run` and the paused-clock tests.
//!
//! Connect attempts follow a script: queued [`ConnectScript`]s are consumed
//! one per attempt, then the default script applies.

use crate::config::{ConnectionConfig, SessionConfig};
use crate::error::{BotError, Result};
use crate::session::{
    MovementControl, Orientation, SessionConnector, SessionEvent, SessionEventSender,
    SessionEvents, SessionHandle,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// An action performed on a simulated session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Look { yaw: f32, pitch: f32 },
    SetControl { control: MovementControl, active: bool },
    ActivateItem,
    SwingArm,
    Chat { message: String },
    Disconnect,
}

/// A recorded action together with the session it hit and when.
#[derive(Debug, Clone)]
pub struct RecordedAction {
    /// 1-based index of the session within this connector.
    pub session: u64,
    pub at: Instant,
    pub action: SessionAction,
}

/// How a session ends once its lifetime is up.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// Plain close.
    Closed { cause: String },
    /// Kick with a reason, followed by a close.
    Kicked { reason: String },
    /// Lower-level error, followed by a close.
    Failed { error: String },
}

/// Behavior of one simulated connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// The attempt fails without producing a session.
    Refuse { error: String },
    /// The attempt produces a session.
    Accept {
        /// Delay between connect and `Ready`.
        ready_after: Duration,
        /// How long the session lives after `Ready`. `None` lives forever.
        lifetime: Option<Duration>,
        end: SessionEnd,
        /// Look direction reported by the session. `None` means the player
        /// entity is never available.
        orientation: Option<Orientation>,
        /// Whether `activate_item` succeeds.
        item_usable: bool,
    },
}

impl ConnectScript {
    /// A session that becomes ready immediately and never ends.
    pub fn accept() -> Self {
        Self::Accept {
            ready_after: Duration::ZERO,
            lifetime: None,
            end: SessionEnd::Closed {
                cause: "session lifetime elapsed".to_owned(),
            },
            orientation: Some(Orientation::default()),
            item_usable: true,
        }
    }

    /// A session that ends with `end` after `lifetime`.
    pub fn accept_for(lifetime: Duration, end: SessionEnd) -> Self {
        Self::Accept {
            ready_after: Duration::ZERO,
            lifetime: Some(lifetime),
            end,
            orientation: Some(Orientation::default()),
            item_usable: true,
        }
    }

    /// A refused attempt.
    pub fn refuse(error: impl Into<String>) -> Self {
        Self::Refuse {
            error: error.into(),
        }
    }

    /// Override the reported orientation.
    pub fn with_orientation(mut self, value: Option<Orientation>) -> Self {
        if let Self::Accept { orientation, .. } = &mut self {
            *orientation = value;
        }
        self
    }

    /// Make `activate_item` fail, as when nothing is held.
    pub fn without_usable_item(mut self) -> Self {
        if let Self::Accept { item_usable, .. } = &mut self {
            *item_usable = false;
        }
        self
    }

    /// Delay the `Ready` event.
    pub fn with_ready_after(mut self, delay: Duration) -> Self {
        if let Self::Accept { ready_after, .. } = &mut self {
            *ready_after = delay;
        }
        self
    }
}

#[derive(Debug)]
struct ConnectorState {
    queued: VecDeque<ConnectScript>,
    default_script: ConnectScript,
    attempts: Vec<Instant>,
    sessions: Vec<Arc<SimulatedSession>>,
}

/// Connector producing [`SimulatedSession`]s. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    state: Arc<Mutex<ConnectorState>>,
    log: Arc<Mutex<Vec<RecordedAction>>>,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(ConnectScript::accept())
    }
}

impl SimulatedConnector {
    /// Create a connector that applies `default_script` to every attempt.
    pub fn new(default_script: ConnectScript) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                queued: VecDeque::new(),
                default_script,
                attempts: Vec::new(),
                sessions: Vec::new(),
            })),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build the dry-run connector from session settings.
    pub fn from_config(config: &SessionConfig) -> Self {
        let script = match config.simulated_lifetime_ms {
            Some(ms) => ConnectScript::accept_for(
                Duration::from_millis(ms),
                SessionEnd::Closed {
                    cause: "simulated session lifetime elapsed".to_owned(),
                },
            ),
            None => ConnectScript::accept(),
        };
        Self::new(script)
    }

    /// Queue a script for the next unscripted attempt.
    pub fn push_script(&self, script: ConnectScript) {
        lock(&self.state).queued.push_back(script);
    }

    /// When each connect attempt happened.
    pub fn attempts(&self) -> Vec<Instant> {
        lock(&self.state).attempts.clone()
    }

    /// All actions recorded across every session, in order.
    pub fn actions(&self) -> Vec<RecordedAction> {
        lock(&self.log).clone()
    }

    /// Number of sessions handed out so far.
    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    /// The most recently created session.
    pub fn latest_session(&self) -> Option<Arc<SimulatedSession>> {
        lock(&self.state).sessions.last().cloned()
    }
}

#[async_trait]
impl SessionConnector for SimulatedConnector {
    async fn connect(
        &self,
        params: &ConnectionConfig,
    ) -> Result<(Arc<dyn SessionHandle>, SessionEvents)> {
        let (script, index) = {
            let mut state = lock(&self.state);
            state.attempts.push(Instant::now());
            let script = state
                .queued
                .pop_front()
                .unwrap_or_else(|| state.default_script.clone());
            (script, state.sessions.len() as u64 + 1)
        };

        let (ready_after, lifetime, end, orientation, item_usable) = match script {
            ConnectScript::Refuse { error } => {
                return Err(BotError::Connection(format!(
                    "{}:{}: {error}",
                    params.host, params.port
                )));
            }
            ConnectScript::Accept {
                ready_after,
                lifetime,
                end,
                orientation,
                item_usable,
            } => (ready_after, lifetime, end, orientation, item_usable),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(SimulatedSession {
            id: format!("sim-{index}"),
            index,
            state: Mutex::new(SimulatedState {
                orientation,
                held: HashSet::new(),
            }),
            item_usable,
            log: Arc::clone(&self.log),
            events: events_tx.clone(),
            closed: CancellationToken::new(),
        });
        lock(&self.state).sessions.push(Arc::clone(&session));

        info!(session = %session.id, user = %params.username, "simulated session opened");
        tokio::spawn(drive_lifecycle(
            events_tx,
            session.closed.clone(),
            ready_after,
            lifetime,
            end,
        ));

        Ok((session, events_rx))
    }
}

/// Emit `Ready`, then the scripted end once the lifetime elapses.
async fn drive_lifecycle(
    events: SessionEventSender,
    closed: CancellationToken,
    ready_after: Duration,
    lifetime: Option<Duration>,
    end: SessionEnd,
) {
    tokio::select! {
        _ = closed.cancelled() => return,
        _ = tokio::time::sleep(ready_after) => {}
    }
    let _ = events.send(SessionEvent::Ready);

    let Some(lifetime) = lifetime else {
        return;
    };
    tokio::select! {
        _ = closed.cancelled() => return,
        _ = tokio::time::sleep(lifetime) => {}
    }
    closed.cancel();

    let close_cause = match end {
        SessionEnd::Closed { cause } => cause,
        SessionEnd::Kicked { reason } => {
            let _ = events.send(SessionEvent::Kicked {
                reason: reason.clone(),
            });
            format!("kicked: {reason}")
        }
        SessionEnd::Failed { error } => {
            let _ = events.send(SessionEvent::Failed {
                error: error.clone(),
            });
            error
        }
    };
    let _ = events.send(SessionEvent::Terminated { cause: close_cause });
}

#[derive(Debug)]
struct SimulatedState {
    orientation: Option<Orientation>,
    held: HashSet<MovementControl>,
}

/// A session that records actions instead of sending them anywhere.
#[derive(Debug)]
pub struct SimulatedSession {
    id: String,
    index: u64,
    state: Mutex<SimulatedState>,
    item_usable: bool,
    log: Arc<Mutex<Vec<RecordedAction>>>,
    events: SessionEventSender,
    closed: CancellationToken,
}

impl SimulatedSession {
    /// Inject an event into this session's stream.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Whether the session has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Whether `control` is currently held down.
    pub fn is_held(&self, control: MovementControl) -> bool {
        lock(&self.state).held.contains(&control)
    }

    fn record(&self, action: SessionAction) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(BotError::Session(format!("{} is closed", self.id)));
        }
        debug!(session = %self.id, ?action, "simulated action");
        lock(&self.log).push(RecordedAction {
            session: self.index,
            at: Instant::now(),
            action,
        });
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for SimulatedSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn orientation(&self) -> Option<Orientation> {
        lock(&self.state).orientation
    }

    async fn look(&self, yaw: f32, pitch: f32) -> Result<()> {
        self.record(SessionAction::Look { yaw, pitch })?;
        lock(&self.state).orientation = Some(Orientation { yaw, pitch });
        Ok(())
    }

    async fn set_control(&self, control: MovementControl, active: bool) -> Result<()> {
        self.record(SessionAction::SetControl { control, active })?;
        let mut state = lock(&self.state);
        if active {
            state.held.insert(control);
        } else {
            state.held.remove(&control);
        }
        Ok(())
    }

    async fn activate_item(&self) -> Result<()> {
        self.record(SessionAction::ActivateItem)?;
        if self.item_usable {
            Ok(())
        } else {
            Err(BotError::Session("no usable item held".to_owned()))
        }
    }

    async fn swing_arm(&self) -> Result<()> {
        self.record(SessionAction::SwingArm)
    }

    async fn chat(&self, message: &str) -> Result<()> {
        self.record(SessionAction::Chat {
            message: message.to_owned(),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.record(SessionAction::Disconnect)?;
        self.closed.cancel();
        let _ = self.events.send(SessionEvent::Terminated {
            cause: "client disconnected".to_owned(),
        });
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn params() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_session_reports_ready() {
        let connector = SimulatedConnector::default();
        let (_session, mut events) = connector.connect(&params()).await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_attempt_returns_connection_error() {
        let connector = SimulatedConnector::default();
        connector.push_script(ConnectScript::refuse("connection refused"));
        let err = connector.connect(&params()).await.err().unwrap();
        assert!(matches!(err, BotError::Connection(msg) if msg.contains("refused")));

        // Queue drained: the next attempt falls back to the default script.
        assert!(connector.connect(&params()).await.is_ok());
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(connector.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kicked_session_emits_kick_then_terminated() {
        let connector = SimulatedConnector::new(ConnectScript::accept_for(
            Duration::from_secs(5),
            SessionEnd::Kicked {
                reason: "idle too long".to_owned(),
            },
        ));
        let (_session, mut events) = connector.connect(&params()).await.unwrap();
        let start = Instant::now();
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Kicked { reason }) if reason == "idle too long"
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Terminated { .. })
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(5_010), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn actions_are_rejected_after_disconnect() {
        let connector = SimulatedConnector::default();
        let (session, mut events) = connector.connect(&params()).await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));

        session.swing_arm().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(session.swing_arm().await.is_err());
        // A second disconnect is a no-op.
        session.disconnect().await.unwrap();

        let actions: Vec<_> = connector.actions().into_iter().map(|a| a.action).collect();
        assert_eq!(actions, vec![SessionAction::SwingArm, SessionAction::Disconnect]);
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Terminated { cause }) if cause == "client disconnected"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn look_updates_reported_orientation() {
        let connector = SimulatedConnector::default();
        let (session, _events) = connector.connect(&params()).await.unwrap();
        session.look(1.25, -0.5).await.unwrap();
        assert_eq!(
            session.orientation(),
            Some(Orientation {
                yaw: 1.25,
                pitch: -0.5
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn item_use_fails_without_usable_item() {
        let connector = SimulatedConnector::new(ConnectScript::accept().without_usable_item());
        let (session, _events) = connector.connect(&params()).await.unwrap();
        assert!(session.activate_item().await.is_err());
        // The attempt is still recorded.
        assert_eq!(connector.actions().len(), 1);
    }
}
