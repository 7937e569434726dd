//! Motor dispatch: the backend-agnostic contract plus the two concrete
//! backends that implement it.

pub mod pwm;
pub mod uart;

use async_trait::async_trait;
use rover_types::{DispatchState, DriveCommand, LinkStatus, MotorStatus, SystemState, Telemetry};

use crate::error::DispatchError;

/// Default stale-command threshold (§4.4): a command older than this is
/// treated as absent and replaced with a safe zero-speed substitute.
pub const DEFAULT_MAX_COMMAND_AGE_MS: u64 = 250;

/// How often the stale-condition warning may repeat while the condition
/// persists, so a silent operator doesn't spam the log at the sender's or
/// listener's full cadence.
pub const STALE_WARNING_THROTTLE: std::time::Duration = std::time::Duration::from_secs(2);

/// Hardware backend for motor actuation. Selected at process start by
/// `control.backend` and held as a trait object, since the choice of
/// backend is a configuration-time decision rather than something calling
/// code branches on — an interface is the natural shape for something
/// swapped out from under `main`, as opposed to a closed tagged variant.
#[async_trait]
pub trait MotorController: Send {
    /// Acquire hardware, spawn background tasks, leave motors at rest.
    /// Must not leave partial resources held on failure.
    async fn start(&mut self) -> Result<(), DispatchError>;

    /// Best-effort stop: motors at rest, tasks cancelled, resources
    /// released. Idempotent — a second call is a no-op that still leaves
    /// hardware at rest.
    async fn stop(&mut self);

    /// Replace the pending commanded state. Only the latest submission
    /// matters; this is not a queue.
    async fn submit(&self, cmd: DriveCommand);

    async fn status(&self) -> MotorStatus;

    /// Latest decoded telemetry, or `None` if this backend doesn't produce
    /// any (the PWM backend never does).
    async fn telemetry(&self) -> Option<Telemetry>;

    /// Latest link counters, or `None` if this backend doesn't track a link
    /// (the PWM backend never does).
    async fn link_status(&self) -> Option<LinkStatus>;

    async fn system_state(&self) -> SystemState {
        SystemState::derive(self.status().await, self.telemetry().await)
    }
}

/// Shared watchdog arithmetic: is `cmd` stale relative to `now`, and what do
/// we substitute if so. Both backends call this identically; it is not
/// itself a `MotorController` method since it has no hardware dependency.
pub fn is_stale(cmd_ts: std::time::Instant, now: std::time::Instant, max_age: std::time::Duration) -> bool {
    now.saturating_duration_since(cmd_ts) > max_age
}

/// `running` is true once `start()` has completed; it only ever goes false
/// again via the explicit `Idle` transition at the end of `stop()`, which
/// bypasses this helper.
pub(crate) fn dispatch_state(running: bool, active: bool, stopping: bool) -> DispatchState {
    if stopping {
        DispatchState::Stopping
    } else if !running {
        DispatchState::Idle
    } else if active {
        DispatchState::RunningActive
    } else {
        DispatchState::RunningSafe
    }
}
