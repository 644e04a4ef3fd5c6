//! Behavior scheduler: arms and disarms the per-session task set.
//!
//! [`BehaviorScheduler::start`] spawns the periodic behaviors for one session
//! and [`BehaviorScheduler::stop`] tears them down again. Both must be called
//! from within a tokio runtime. The session is injected at `start()`; the
//! scheduler never looks anything up from shared state.

use crate::config::BehaviorConfig;
use crate::scheduler::generation::{GenerationCounter, GenerationToken};
use crate::scheduler::tasks::{self, OrientationBaseline, TaskContext};
use crate::session::SessionHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Delay before the head turns back to the baseline after each oscillation.
pub const HEAD_REVERT_DELAY: Duration = Duration::from_millis(4_000);

/// The live task set of one session.
struct ArmedTasks {
    token: GenerationToken,
    cancel: CancellationToken,
    tracker: TaskTracker,
    periodic_timers: usize,
    session: Arc<dyn SessionHandle>,
    forward_held: Arc<AtomicBool>,
}

/// Runs the presence behaviors against the current session.
pub struct BehaviorScheduler {
    config: BehaviorConfig,
    generation: GenerationCounter,
    armed: Option<ArmedTasks>,
}

impl BehaviorScheduler {
    pub fn new(config: BehaviorConfig) -> Self {
        Self {
            config,
            generation: GenerationCounter::new(),
            armed: None,
        }
    }

    /// Arm every behavior timer against `session`.
    ///
    /// A scheduler that is already running is stopped first, so a repeated
    /// ready signal for the same session restarts the task set with the new
    /// baseline instead of stacking a second one. A forward pulse the old set
    /// was holding is released on its session.
    pub fn start(&mut self, session: Arc<dyn SessionHandle>, baseline: OrientationBaseline) {
        let held_by_previous = self
            .armed
            .as_ref()
            .filter(|armed| armed.forward_held.load(Ordering::SeqCst))
            .map(|armed| Arc::clone(&armed.session));
        if self.armed.is_some() {
            debug!("behavior tasks already running, restarting");
            self.stop();
        }

        let token = self.generation.advance();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let forward_held = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext {
            session: Arc::clone(&session),
            token: token.clone(),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
            started_at: Instant::now(),
        };
        let config = &self.config;

        if let Some(previous) = held_by_previous {
            tracker.spawn(tasks::release_forward(previous));
        }
        tracker.spawn(tasks::orientation_oscillation(
            ctx.clone(),
            config.head_rotate_interval(),
            config.head_rotate_amount_rad(),
            HEAD_REVERT_DELAY,
            baseline,
        ));
        tracker.spawn(tasks::movement_pulse(
            ctx.clone(),
            config.micro_move_interval(),
            config.micro_move_duration(),
            Arc::clone(&forward_held),
        ));
        tracker.spawn(tasks::gesture_pulse(ctx.clone(), config.arm_swing_interval()));
        let mut periodic_timers = 3;

        if config.chat_ping_enabled {
            tracker.spawn(tasks::heartbeat_message(
                ctx,
                config.chat_ping_interval(),
                config.chat_ping_message.clone(),
            ));
            periodic_timers += 1;
        }

        info!(
            session = session.id(),
            generation = token.id(),
            baseline_yaw = baseline.yaw,
            timers = periodic_timers,
            "AFK behavior started"
        );
        self.armed = Some(ArmedTasks {
            token,
            cancel,
            tracker,
            periodic_timers,
            session,
            forward_held,
        });
    }

    /// Cancel every periodic and one-shot timer of the current task set.
    ///
    /// Safe to call when nothing is running.
    pub fn stop(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };

        // Invalidate before cancelling so a callback racing the cancel sees a
        // stale generation.
        self.generation.advance();
        armed.cancel.cancel();
        armed.tracker.close();

        info!(
            session = armed.session.id(),
            generation = armed.token.id(),
            "AFK behavior stopped"
        );
    }

    /// Whether a task set is armed.
    pub fn is_active(&self) -> bool {
        self.armed.is_some()
    }

    /// Number of periodic timers in the armed task set (0 when stopped).
    pub fn armed_timers(&self) -> usize {
        self.armed.as_ref().map_or(0, |armed| armed.periodic_timers)
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }
}

impl Drop for BehaviorScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
