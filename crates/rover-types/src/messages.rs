//! Inter-component message types carried on the typed bus.
//!
//! These mirror the entities described in the data model: `TeleopInput` in,
//! `DriveCommand` through the shaper, `Telemetry`/`LinkStatus` back out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Fault flags (Telemetry.fault_flags) ───────────────────────────────────────

pub const FAULT_WATCHDOG: u16 = 0x01;
pub const FAULT_ESTOP_ACTIVE: u16 = 0x02;
pub const FAULT_UNDERVOLT: u16 = 0x04;
pub const FAULT_OVERVOLT: u16 = 0x08;
pub const FAULT_DRIVER: u16 = 0x10;
pub const FAULT_OVERCURRENT: u16 = 0x20;
pub const FAULT_THERMAL: u16 = 0x40;

// ── Teleop input (operator → Shaper) ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeleopInput {
    /// Forward/backward intent, clamped to [-1, 1] at ingress.
    pub throttle: f64,
    /// Left/right intent, clamped to [-1, 1] at ingress.
    pub turn: f64,
    pub enable: bool,
    pub estop: bool,
    pub ts: DateTime<Utc>,
}

impl TeleopInput {
    /// Clamp throttle/turn into range; the operator surface is expected to
    /// do this too, but bounds are re-enforced here since this is the
    /// ingress boundary for this crate's consumers.
    pub fn clamped(mut self) -> Self {
        self.throttle = self.throttle.clamp(-1.0, 1.0);
        self.turn = self.turn.clamp(-1.0, 1.0);
        self
    }
}

// ── Drive command (Shaper / watchdog → MotorDispatch) ─────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriveSource {
    Teleop,
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
    pub enable_request: bool,
    pub estop: bool,
    pub ts: DateTime<Utc>,
    pub source: DriveSource,
}

impl DriveCommand {
    /// The safe command substituted by a backend's watchdog for a stale
    /// commanded state: zero speed, `enable_request=true` and `estop=false`
    /// so the wire frame keeps driving (rather than latching) the firmware's
    /// own e-stop, timestamped now.
    pub fn safe_stop(now: DateTime<Utc>) -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            enable_request: true,
            estop: false,
            ts: now,
            source: DriveSource::Watchdog,
        }
    }
}

// ── Telemetry (UartBackend → bus) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub left_pwm: i16,
    pub right_pwm: i16,
    pub bus_mv: u16,
    pub fault_flags: u16,
    /// Firmware's own view of how stale its last accepted command is.
    pub age_ms: u16,
    pub ts: DateTime<Utc>,
}

impl Telemetry {
    pub fn has_fault(&self, bit: u16) -> bool {
        self.fault_flags & bit != 0
    }

    pub fn is_watchdog(&self) -> bool {
        self.has_fault(FAULT_WATCHDOG)
    }

    pub fn is_estop_active(&self) -> bool {
        self.has_fault(FAULT_ESTOP_ACTIVE)
    }

    pub fn any_fault(&self) -> bool {
        self.fault_flags != 0
    }
}

// ── Link status (per UartBackend) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub crc_errors: u64,
    pub version_errors: u64,
    pub decode_errors: u64,
    /// Milliseconds since UNIX epoch, or 0 if never received/sent.
    pub last_telemetry_ts_ms: u64,
    pub last_command_ts_ms: u64,
}

// ── Motor status (either backend) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendTag {
    Uart,
    PiPwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorStatus {
    pub enabled: bool,
    /// Milliseconds since UNIX epoch, or 0 if no command has ever arrived.
    pub last_command_ts_ms: u64,
    pub has_fault: bool,
    pub backend_tag: BackendTag,
}

/// Three-way summary used for display: derived from `MotorStatus` and the
/// latest `Telemetry`, not stored anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Faulted,
    Enabled,
    Stopped,
}

impl SystemState {
    pub fn derive(status: MotorStatus, telemetry: Option<Telemetry>) -> Self {
        if telemetry.is_some_and(|t| t.any_fault()) {
            SystemState::Faulted
        } else if status.enabled {
            SystemState::Enabled
        } else {
            SystemState::Stopped
        }
    }
}

/// Dispatch-internal lifecycle state shared by both backends (§4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Idle,
    RunningSafe,
    RunningActive,
    Stopping,
}
