//! afkbot: keeps a game account present on a server while nobody is at the
//! keyboard.
//!
//! # Architecture
//!
//! - **Supervisor** ([`supervisor`]): connects, waits for the session to become
//!   ready, and reconnects after a fixed delay whenever the session ends.
//! - **Scheduler** ([`scheduler`]): per-session presence behaviors (head
//!   oscillation, short forward pulses, item use and arm swing, optional chat
//!   ping), all cancelled together when the session goes away.
//! - **Session** ([`session`]): the collaborator contract plus two backends,
//!   a recording simulator and a plain TCP presence connection.
//!
//! The protocol itself (framing, login handshake, world state) is not part of
//! this crate; a full client plugs in by implementing
//! [`session::SessionConnector`] and [`session::SessionHandle`].

pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod session;
pub mod supervisor;

pub use config::BotConfig;
pub use error::{BotError, Result};
pub use scheduler::BehaviorScheduler;
pub use supervisor::{ConnectionSupervisor, SupervisorEvent, SupervisorState, SupervisorStats};
