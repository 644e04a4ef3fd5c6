//! Per-session behavior scheduler.
//!
//! Runs the independent presence behaviors (head oscillation, movement
//! pulse, gesture pulse and the optional chat ping) against one session.
//! Timers of a superseded session are invalidated by generation tokens.

pub mod generation;
pub mod runner;
pub mod tasks;

pub use generation::{GenerationCounter, GenerationToken};
pub use runner::{BehaviorScheduler, HEAD_REVERT_DELAY};
pub use tasks::{OrientationBaseline, YawDirection};
