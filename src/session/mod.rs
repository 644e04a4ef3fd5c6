//! Session collaborator contract.
//!
//! A session is the live connection to the remote server. Protocol work
//! (framing, auth handshake, world state) lives behind [`SessionHandle`];
//! this crate only needs the lifecycle events and a handful of actions.
//!
//! A [`SessionConnector`] creates sessions. Each successful connect returns
//! the handle together with a [`SessionEvents`] stream that the supervisor is
//! the sole consumer of.

pub mod simulated;
pub mod tcp;

pub use simulated::{ConnectScript, RecordedAction, SessionAction, SimulatedConnector};
pub use tcp::TcpConnector;

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle events emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session has fully joined and can accept actions.
    Ready,
    /// The server removed us. A `Terminated` event normally follows.
    Kicked { reason: String },
    /// The session ended, gracefully or not.
    Terminated { cause: String },
    /// A lower-level connection error.
    Failed { error: String },
    /// Chat or system message from the server.
    Message { text: String },
}

/// Receiving half of a session's event stream.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half of a session's event stream, held by the session backend.
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

/// Look direction in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
}

/// Movement controls a session can hold down.
///
/// Only the forward step is driven by the presence behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementControl {
    Forward,
}

impl fmt::Display for MovementControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
        }
    }
}

/// Actions the bot performs on a live session.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Short identifier for log lines.
    fn id(&self) -> &str;

    /// Current look direction, if the session knows where it is facing.
    ///
    /// Returns `None` before the player entity exists.
    fn orientation(&self) -> Option<Orientation>;

    /// Turn to the given yaw/pitch immediately.
    async fn look(&self, yaw: f32, pitch: f32) -> Result<()>;

    /// Press or release a movement control.
    async fn set_control(&self, control: MovementControl, active: bool) -> Result<()>;

    /// Use the held item. Fails when nothing usable is held.
    async fn activate_item(&self) -> Result<()>;

    /// Swing the main arm.
    async fn swing_arm(&self) -> Result<()>;

    /// Send a chat message.
    async fn chat(&self, message: &str) -> Result<()>;

    /// Leave the server gracefully.
    async fn disconnect(&self) -> Result<()>;
}

/// Factory for sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BotError::Connection`] when the server cannot be
    /// reached. Such a failure produces no event stream.
    async fn connect(
        &self,
        params: &ConnectionConfig,
    ) -> Result<(Arc<dyn SessionHandle>, SessionEvents)>;
}
