//! Connection supervisor.
//!
//! Owns the session lifecycle: connects, arms the behavior scheduler when
//! the session becomes ready, tears everything down when it ends, and
//! reconnects after a fixed delay. Exactly one reconnect is scheduled per
//! session termination, and a connect failure is retried the same way.
//!
//! The supervisor is the only consumer of a session's event stream. When a
//! session is torn down its stream is dropped, so late events from that
//! session (for example a `Terminated` following a `Failed`) can never
//! schedule a second reconnect.

pub mod state;

pub use state::{SupervisorEvent, SupervisorState, SupervisorStats};

use crate::config::BotConfig;
use crate::error::Result;
use crate::scheduler::{BehaviorScheduler, OrientationBaseline};
use crate::session::{SessionConnector, SessionEvent, SessionEvents, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Upper bound on a graceful disconnect during shutdown.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Keeps one session alive and the behavior scheduler attached to it.
pub struct ConnectionSupervisor {
    config: BotConfig,
    connector: Arc<dyn SessionConnector>,
    scheduler: BehaviorScheduler,
    session: Option<Arc<dyn SessionHandle>>,
    state: SupervisorState,
    stats: SupervisorStats,
    observer: Option<mpsc::UnboundedSender<SupervisorEvent>>,
}

impl ConnectionSupervisor {
    pub fn new(config: BotConfig, connector: Arc<dyn SessionConnector>) -> Self {
        let scheduler = BehaviorScheduler::new(config.behavior.clone());
        Self {
            config,
            connector,
            scheduler,
            session: None,
            state: SupervisorState::Disconnected,
            stats: SupervisorStats::default(),
            observer: None,
        }
    }

    /// Publish lifecycle events to `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Whether a session is currently held.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn scheduler(&self) -> &BehaviorScheduler {
        &self.scheduler
    }

    /// Reconnect delay from the configuration.
    pub fn reconnect_delay(&self) -> Duration {
        self.config.reconnect.delay()
    }

    /// Open a new session and return its event stream.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when the session cannot be created.
    /// The caller is expected to route it through [`Self::on_failed`].
    pub async fn start(&mut self) -> Result<SessionEvents> {
        self.transition(SupervisorState::Connecting);
        self.stats.connect_attempts += 1;
        self.emit(SupervisorEvent::Connecting {
            attempt: self.stats.connect_attempts,
        });

        let params = &self.config.connection;
        info!(
            "Connecting to {}:{} as {} (auth={})",
            params.host, params.port, params.username, params.auth
        );

        let (session, events) = self.connector.connect(params).await?;
        debug!(session = session.id(), "session created, waiting for ready");
        self.session = Some(session);
        Ok(events)
    }

    /// The session joined: capture the baseline and arm the behaviors.
    ///
    /// A repeated ready signal restarts the task set with a fresh baseline.
    pub fn on_ready(&mut self) {
        let Some(session) = self.session.clone() else {
            warn!("ready signal without a session, ignoring");
            return;
        };

        self.stats.sessions_ready += 1;
        let baseline = OrientationBaseline::capture(session.as_ref());
        info!(session = session.id(), "Bot spawned. Starting AFK behavior...");

        self.transition(SupervisorState::Active);
        let session_id = session.id().to_owned();
        self.scheduler.start(session, baseline);
        debug!(
            session = %session_id,
            generation = self.scheduler.generation(),
            "behavior generation armed"
        );
        self.emit(SupervisorEvent::Ready {
            session_id,
            baseline_yaw: baseline.yaw,
        });
    }

    /// The server kicked the bot. Only logged; the termination that follows
    /// drives the reconnect.
    pub fn on_kicked(&mut self, reason: &str) {
        warn!(reason, "Kicked from server");
        self.stats.kicks += 1;
        self.emit(SupervisorEvent::Kicked {
            reason: reason.to_owned(),
        });
    }

    pub fn on_message(&self, text: &str) {
        trace!(text, "server message");
    }

    /// The session ended. Tears down and returns the reconnect delay.
    pub fn on_terminated(&mut self, cause: &str) -> Duration {
        let delay = self.reconnect_delay();
        info!(
            cause,
            "Connection closed, will reconnect in {} ms",
            delay.as_millis()
        );
        self.stats.terminations += 1;
        self.emit(SupervisorEvent::Terminated {
            cause: cause.to_owned(),
        });
        self.teardown();
        self.schedule_reconnect()
    }

    /// A connect attempt or a live session failed. Tears down, releases the
    /// session if one is held, and returns the reconnect delay.
    pub async fn on_failed(&mut self, error: &str) -> Duration {
        warn!(error, "Connection error");
        self.stats.failures += 1;
        self.emit(SupervisorEvent::Failed {
            error: error.to_owned(),
        });

        self.scheduler.stop();
        if let Some(session) = self.session.take() {
            release(session.as_ref()).await;
        }
        self.teardown();
        self.schedule_reconnect()
    }

    /// Operator shutdown: stop the behaviors and leave the server.
    ///
    /// The disconnect is bounded by [`DISCONNECT_TIMEOUT`] and its errors
    /// are swallowed. Calling this more than once is harmless.
    pub async fn shutdown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!("Shutting down...");
        self.scheduler.stop();
        if let Some(session) = self.session.take() {
            release(session.as_ref()).await;
        }
        self.transition(SupervisorState::ShuttingDown);
        self.emit(SupervisorEvent::ShutDown);
    }

    /// Drive the connect / ready / teardown / reconnect loop until
    /// `shutdown` is cancelled. Returns the lifetime counters.
    pub async fn run(mut self, shutdown: CancellationToken) -> SupervisorStats {
        let mut next_attempt = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(next_attempt) => {}
            }

            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.start() => result,
            };

            let delay = match connected {
                Ok(events) => match self.drive_session(events, &shutdown).await {
                    Some(delay) => delay,
                    None => break,
                },
                Err(e) => self.on_failed(&e.to_string()).await,
            };
            next_attempt = Instant::now() + delay;
        }

        self.shutdown().await;
        info!(stats = ?self.stats, "supervisor stopped");
        self.stats
    }

    /// Dispatch one session's events until it ends. Returns the reconnect
    /// delay, or `None` when shutdown was requested.
    async fn drive_session(
        &mut self,
        mut events: SessionEvents,
        shutdown: &CancellationToken,
    ) -> Option<Duration> {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                event = events.recv() => event,
            };

            match event {
                Some(SessionEvent::Ready) => self.on_ready(),
                Some(SessionEvent::Kicked { reason }) => self.on_kicked(&reason),
                Some(SessionEvent::Message { text }) => self.on_message(&text),
                Some(SessionEvent::Failed { error }) => return Some(self.on_failed(&error).await),
                Some(SessionEvent::Terminated { cause }) => {
                    return Some(self.on_terminated(&cause));
                }
                None => return Some(self.on_terminated("session event stream closed")),
            }
        }
    }

    fn teardown(&mut self) {
        self.scheduler.stop();
        self.session = None;
        self.transition(SupervisorState::Disconnected);
    }

    fn schedule_reconnect(&mut self) -> Duration {
        let delay = self.reconnect_delay();
        self.stats.reconnects_scheduled += 1;
        debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.emit(SupervisorEvent::ReconnectScheduled { delay });
        delay
    }

    fn transition(&mut self, next: SupervisorState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            warn!(%from, to = %next, "unexpected supervisor transition");
        }
        debug!(%from, to = %next, "supervisor state changed");
        self.state = next;
        self.emit(SupervisorEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(observer) = &self.observer {
            // A dropped observer only means nobody is listening any more.
            let _ = observer.send(event);
        }
    }
}

/// Best-effort graceful disconnect.
async fn release(session: &dyn SessionHandle) {
    match tokio::time::timeout(DISCONNECT_TIMEOUT, session.disconnect()).await {
        Ok(Ok(())) => debug!(session = session.id(), "session disconnected"),
        Ok(Err(e)) => debug!(session = session.id(), error = %e, "disconnect failed, ignoring"),
        Err(_) => debug!(session = session.id(), "disconnect timed out, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::{BehaviorConfig, ReconnectConfig};
    use crate::session::simulated::SessionEnd;
    use crate::session::{ConnectScript, SessionAction, SimulatedConnector};

    fn config() -> BotConfig {
        BotConfig {
            behavior: BehaviorConfig {
                head_rotate_interval_ms: 10_000,
                ..Default::default()
            },
            reconnect: ReconnectConfig { delay_ms: 10_000 },
            ..Default::default()
        }
    }

    fn supervisor(connector: &SimulatedConnector) -> ConnectionSupervisor {
        ConnectionSupervisor::new(config(), Arc::new(connector.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_ready_arms_scheduler() {
        let connector = SimulatedConnector::default();
        let mut supervisor = supervisor(&connector);

        let mut events = supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Connecting);
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));

        supervisor.on_ready();
        assert_eq!(supervisor.state(), SupervisorState::Active);
        assert!(supervisor.scheduler().is_active());
        assert_eq!(supervisor.stats().sessions_ready, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_without_session_is_ignored() {
        let connector = SimulatedConnector::default();
        let mut supervisor = supervisor(&connector);
        supervisor.on_ready();
        assert!(!supervisor.scheduler().is_active());
        assert_eq!(supervisor.state(), SupervisorState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_tears_down_and_schedules_one_reconnect() {
        let connector = SimulatedConnector::default();
        let mut supervisor = supervisor(&connector);
        let _events = supervisor.start().await.unwrap();
        supervisor.on_ready();

        let delay = supervisor.on_terminated("socketClosed");
        assert_eq!(delay, Duration::from_millis(10_000));
        assert!(!supervisor.scheduler().is_active());
        assert!(!supervisor.has_session());
        assert_eq!(supervisor.state(), SupervisorState::Disconnected);
        assert_eq!(supervisor.stats().reconnects_scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_schedules_retry() {
        let connector = SimulatedConnector::new(ConnectScript::refuse("ECONNREFUSED"));
        let mut supervisor = supervisor(&connector);

        let err = supervisor.start().await.unwrap_err();
        let delay = supervisor.on_failed(&err.to_string()).await;
        assert_eq!(delay, Duration::from_millis(10_000));
        assert_eq!(supervisor.state(), SupervisorState::Disconnected);
        assert_eq!(supervisor.stats().failures, 1);
        assert_eq!(supervisor.stats().reconnects_scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kicked_does_not_reconnect_by_itself() {
        let connector = SimulatedConnector::default();
        let mut supervisor = supervisor(&connector);
        let _events = supervisor.start().await.unwrap();
        supervisor.on_ready();

        supervisor.on_kicked("idle too long");
        assert!(supervisor.scheduler().is_active());
        assert_eq!(supervisor.stats().kicks, 1);
        assert_eq!(supervisor.stats().reconnects_scheduled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_the_session() {
        let connector = SimulatedConnector::default();
        let mut supervisor = supervisor(&connector);
        let _events = supervisor.start().await.unwrap();
        supervisor.on_ready();

        supervisor.shutdown().await;
        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), SupervisorState::ShuttingDown);
        assert!(!supervisor.scheduler().is_active());
        assert!(connector.latest_session().unwrap().is_closed());
        let disconnects = connector
            .actions()
            .into_iter()
            .filter(|a| a.action == SessionAction::Disconnect)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_then_terminated_reconnects_once() {
        let connector = SimulatedConnector::new(ConnectScript::accept_for(
            Duration::from_secs(5),
            SessionEnd::Failed {
                error: "ECONNRESET".into(),
            },
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = supervisor(&connector).with_observer(tx);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(shutdown.clone()));

        // Session ends at 5s, the reconnect lands at 15s.
        tokio::time::sleep(Duration::from_millis(14_000)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.failures, 1);
        assert_eq!(stats.terminations, 0);
        assert_eq!(stats.reconnects_scheduled, 1);
        assert_eq!(stats.connect_attempts, 1);

        let mut reconnects = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SupervisorEvent::ReconnectScheduled { .. }) {
                reconnects += 1;
            }
        }
        assert_eq!(reconnects, 1);
    }
}
