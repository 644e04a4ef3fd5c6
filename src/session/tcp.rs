//! Transport-level presence sessions over plain TCP.
//!
//! [`TcpConnector`] opens a socket to `host:port` and keeps it open. The
//! session is `Ready` as soon as the socket connects and `Terminated` when the
//! peer closes it or the socket errors. Game protocol encoding is not done
//! here: look and control state are tracked locally so the behavior tasks
//! stay meaningful, and gestures and chat are logged at trace level.

use crate::config::{ConnectionConfig, SessionConfig};
use crate::error::{BotError, Result};
use crate::session::{
    MovementControl, Orientation, SessionConnector, SessionEvent, SessionEventSender,
    SessionEvents, SessionHandle,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Read buffer for draining inbound bytes.
const READ_BUFFER_BYTES: usize = 4096;

/// Connector that opens TCP presence sessions.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.connect_timeout())
    }
}

#[async_trait]
impl SessionConnector for TcpConnector {
    async fn connect(
        &self,
        params: &ConnectionConfig,
    ) -> Result<(Arc<dyn SessionHandle>, SessionEvents)> {
        let target = format!("{}:{}", params.host, params.port);
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((params.host.as_str(), params.port)),
        )
        .await
        .map_err(|_| {
            BotError::Connection(format!(
                "{target}: timed out after {}ms",
                self.connect_timeout.as_millis()
            ))
        })?
        .map_err(|e| BotError::Connection(format!("{target}: {e}")))?;

        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or(target);
        let (reader, writer) = stream.into_split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        tokio::spawn(watch_connection(reader, events_tx.clone(), closed.clone()));

        info!(%peer, user = %params.username, "tcp session opened");
        let _ = events_tx.send(SessionEvent::Ready);

        let session = TcpSession {
            id: format!("tcp-{peer}"),
            state: Mutex::new(LocalState {
                orientation: Orientation::default(),
                held: HashSet::new(),
            }),
            writer: tokio::sync::Mutex::new(Some(writer)),
            closed,
        };
        Ok((Arc::new(session), events_rx))
    }
}

/// Drain inbound bytes until the socket closes, then report the end.
async fn watch_connection(
    mut reader: OwnedReadHalf,
    events: SessionEventSender,
    closed: CancellationToken,
) {
    let mut buf = vec![0u8; READ_BUFFER_BYTES];
    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let _ = events.send(SessionEvent::Terminated {
                    cause: "client disconnected".to_owned(),
                });
                return;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    closed.cancel();
                    let _ = events.send(SessionEvent::Terminated {
                        cause: "connection closed by peer".to_owned(),
                    });
                    return;
                }
                Ok(n) => trace!(bytes = n, "tcp session received data"),
                Err(e) => {
                    closed.cancel();
                    let _ = events.send(SessionEvent::Failed { error: e.to_string() });
                    let _ = events.send(SessionEvent::Terminated { cause: e.to_string() });
                    return;
                }
            }
        }
    }
}

#[derive(Debug)]
struct LocalState {
    orientation: Orientation,
    held: HashSet<MovementControl>,
}

/// A TCP presence session.
pub struct TcpSession {
    id: String,
    state: Mutex<LocalState>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    closed: CancellationToken,
}

impl TcpSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            Err(BotError::Session(format!("{} is closed", self.id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionHandle for TcpSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn orientation(&self) -> Option<Orientation> {
        if self.closed.is_cancelled() {
            return None;
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state.orientation)
    }

    async fn look(&self, yaw: f32, pitch: f32) -> Result<()> {
        self.ensure_open()?;
        trace!(session = %self.id, yaw, pitch, "look");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.orientation = Orientation { yaw, pitch };
        Ok(())
    }

    async fn set_control(&self, control: MovementControl, active: bool) -> Result<()> {
        self.ensure_open()?;
        trace!(session = %self.id, %control, active, "set control");
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if active {
            state.held.insert(control);
        } else {
            state.held.remove(&control);
        }
        Ok(())
    }

    async fn activate_item(&self) -> Result<()> {
        self.ensure_open()?;
        trace!(session = %self.id, "activate item");
        Ok(())
    }

    async fn swing_arm(&self) -> Result<()> {
        self.ensure_open()?;
        trace!(session = %self.id, "swing arm");
        Ok(())
    }

    async fn chat(&self, message: &str) -> Result<()> {
        self.ensure_open()?;
        trace!(session = %self.id, message, "chat");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.closed.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            debug!(session = %self.id, "shutting down tcp session");
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use tokio::net::TcpListener;

    fn params_for(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_owned(),
            port,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn connect_reports_ready_and_peer_close_terminates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new(Duration::from_secs(2));
        let (session, mut events) = connector.connect(&params_for(port)).await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));

        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(SessionEvent::Terminated { .. })), "{event:?}");
        assert!(session.orientation().is_none());
        assert!(session.swing_arm().await.is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let connector = TcpConnector::new(Duration::from_secs(2));
        let err = connector.connect(&params_for(port)).await.err().unwrap();
        assert!(matches!(err, BotError::Connection(_)), "{err}");
    }

    #[tokio::test]
    async fn disconnect_terminates_and_tracks_local_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = TcpConnector::new(Duration::from_secs(2));
        let (session, mut events) = connector.connect(&params_for(port)).await.unwrap();
        let _server_side = listener.accept().await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::Ready));

        session.look(0.5, 0.1).await.unwrap();
        assert_eq!(session.orientation().map(|o| o.yaw), Some(0.5));

        session.disconnect().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::Terminated {
                cause: "client disconnected".to_owned()
            })
        );
        // Idempotent.
        session.disconnect().await.unwrap();
    }
}
