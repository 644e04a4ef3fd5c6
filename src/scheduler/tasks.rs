//! The periodic presence behaviors.
//!
//! Each behavior is an independent tokio task. Timers are measured from the
//! moment the task set starts: the first firing happens one full interval
//! after `start()`. Every firing is guarded by the task set's cancellation
//! token and generation token, and every session error is logged and dropped.

use crate::scheduler::generation::GenerationToken;
use crate::session::{MovementControl, SessionHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Reference yaw for the head oscillation, captured when a session becomes ready.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationBaseline {
    pub yaw: f32,
}

impl OrientationBaseline {
    /// Read the session's current yaw, or 0 when it cannot report one.
    pub fn capture(session: &dyn SessionHandle) -> Self {
        match session.orientation() {
            Some(orientation) => Self {
                yaw: orientation.yaw,
            },
            None => {
                debug!(session = session.id(), "orientation unavailable; baseline yaw is 0");
                Self::default()
            }
        }
    }
}

/// Which way the next head turn goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YawDirection {
    Positive,
    Negative,
}

impl YawDirection {
    pub fn sign(self) -> f32 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Positive => Self::Negative,
            Self::Negative => Self::Positive,
        }
    }
}

/// Everything a behavior task needs, shared by all tasks of one session.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub(crate) session: Arc<dyn SessionHandle>,
    pub(crate) token: GenerationToken,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    /// When the task set was armed; periodic timers count from here.
    pub(crate) started_at: Instant,
}

impl TaskContext {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && self.token.is_current()
    }
}

/// Fixed-period timer whose first tick is one period after the task set started.
struct PeriodicTimer {
    interval: Interval,
}

impl PeriodicTimer {
    fn new(started_at: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(started_at + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Wait for the next tick. Returns `false` once the task set is gone.
    async fn tick(&mut self, ctx: &TaskContext) -> bool {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => false,
            _ = self.interval.tick() => ctx.is_live(),
        }
    }
}

/// Turn slightly away from the baseline, alternating sides, and turn back
/// after `revert_after`.
pub(crate) async fn orientation_oscillation(
    ctx: TaskContext,
    interval: Duration,
    amount_rad: f32,
    revert_after: Duration,
    baseline: OrientationBaseline,
) {
    let mut timer = PeriodicTimer::new(ctx.started_at, interval);
    let mut direction = YawDirection::Positive;

    while timer.tick(&ctx).await {
        let offset = direction.sign() * amount_rad;
        direction = direction.flipped();

        if look_at(&ctx, baseline.yaw + offset).await {
            ctx.tracker
                .spawn(revert_orientation(ctx.clone(), baseline, revert_after));
        }
    }
    debug!(generation = ctx.token.id(), "orientation oscillation stopped");
}

/// One-shot return to the exact baseline yaw.
async fn revert_orientation(ctx: TaskContext, baseline: OrientationBaseline, delay: Duration) {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }
    if !ctx.is_live() {
        return;
    }
    look_at(&ctx, baseline.yaw).await;
}

/// Look at `yaw`, keeping the current pitch. Returns whether the look went out.
async fn look_at(ctx: &TaskContext, yaw: f32) -> bool {
    let Some(current) = ctx.session.orientation() else {
        debug!(session = ctx.session.id(), "no orientation available, skipping look");
        return false;
    };
    match ctx.session.look(yaw, current.pitch).await {
        Ok(()) => true,
        Err(e) => {
            debug!(session = ctx.session.id(), error = %e, "look failed");
            false
        }
    }
}

/// Hold the forward control for `hold` every `interval`.
///
/// A tick that fires while the previous pulse is still held is skipped, so
/// pulses never overlap. `held` mirrors whether forward is currently pressed
/// so a replacing task set can release it.
pub(crate) async fn movement_pulse(
    ctx: TaskContext,
    interval: Duration,
    hold: Duration,
    held: Arc<AtomicBool>,
) {
    let mut timer = PeriodicTimer::new(ctx.started_at, interval);
    let mut release_at: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(release_at.unwrap_or_else(Instant::now)), if release_at.is_some() => {
                release_at = None;
                if !ctx.is_live() {
                    break;
                }
                if let Err(e) = ctx.session.set_control(MovementControl::Forward, false).await {
                    debug!(session = ctx.session.id(), error = %e, "forward release failed");
                }
                held.store(false, Ordering::SeqCst);
            }
            live = timer.tick(&ctx) => {
                if !live {
                    break;
                }
                if release_at.is_some() {
                    debug!(session = ctx.session.id(), "movement pulse still held, skipping tick");
                    continue;
                }
                match ctx.session.set_control(MovementControl::Forward, true).await {
                    Ok(()) => {
                        held.store(true, Ordering::SeqCst);
                        release_at = Some(Instant::now() + hold);
                    }
                    Err(e) => debug!(session = ctx.session.id(), error = %e, "forward press failed"),
                }
            }
        }
    }
    debug!(generation = ctx.token.id(), "movement pulse stopped");
}

/// Release a forward pulse left held by a task set that was replaced.
pub(crate) async fn release_forward(session: Arc<dyn SessionHandle>) {
    match session.set_control(MovementControl::Forward, false).await {
        Ok(()) => debug!(session = session.id(), "released forward held by previous task set"),
        Err(e) => debug!(session = session.id(), error = %e, "forward release failed"),
    }
}

/// Use the held item and swing the arm every `interval`.
///
/// The two gestures fail independently; neither failure is reported.
pub(crate) async fn gesture_pulse(ctx: TaskContext, interval: Duration) {
    let mut timer = PeriodicTimer::new(ctx.started_at, interval);

    while timer.tick(&ctx).await {
        if let Err(e) = ctx.session.activate_item().await {
            debug!(session = ctx.session.id(), error = %e, "activate item ignored");
        }
        if let Err(e) = ctx.session.swing_arm().await {
            debug!(session = ctx.session.id(), error = %e, "swing arm ignored");
        }
    }
    debug!(generation = ctx.token.id(), "gesture pulse stopped");
}

/// Send `message` every `interval`.
pub(crate) async fn heartbeat_message(ctx: TaskContext, interval: Duration, message: String) {
    let mut timer = PeriodicTimer::new(ctx.started_at, interval);

    while timer.tick(&ctx).await {
        if let Err(e) = ctx.session.chat(&message).await {
            warn!(session = ctx.session.id(), error = %e, "chat ping failed");
        }
    }
    debug!(generation = ctx.token.id(), "chat ping stopped");
}
