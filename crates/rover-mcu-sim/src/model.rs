//! Toy motion-MCU state: just enough of a "motor" to produce plausible
//! `TELEMETRY` in response to `DRIVE_CMD`/`STOP_CMD` frames.

use std::time::Instant;

use rover_types::protocol::{q15_to_speed, DriveCmdPayload, TelemetryPayload};
use rover_types::{FAULT_ESTOP_ACTIVE, FAULT_WATCHDOG};

/// Above this, the simulated firmware considers its own last-accepted
/// command stale and raises `WATCHDOG` in its own telemetry — mirroring
/// real firmware that runs an independent watchdog against the same
/// default threshold the core uses, not something the core tells it.
const FIRMWARE_WATCHDOG_MS: u128 = 250;

#[derive(Debug)]
pub struct MotorModel {
    left_pwm: i16,
    right_pwm: i16,
    estop_latched: bool,
    last_cmd: Option<Instant>,
}

impl Default for MotorModel {
    fn default() -> Self {
        Self { left_pwm: 0, right_pwm: 0, estop_latched: false, last_cmd: None }
    }
}

fn speed_to_pwm(speed: f64) -> i16 {
    (speed.clamp(-1.0, 1.0) * 10_000.0).round() as i16
}

impl MotorModel {
    pub fn apply_drive_cmd(&mut self, payload: &DriveCmdPayload, now: Instant) {
        self.last_cmd = Some(now);
        if payload.estop() {
            self.estop_latched = true;
            self.left_pwm = 0;
            self.right_pwm = 0;
            return;
        }
        self.estop_latched = false;
        if !payload.enable_request() {
            self.left_pwm = 0;
            self.right_pwm = 0;
            return;
        }
        self.left_pwm = speed_to_pwm(q15_to_speed(i16::from_le(payload.left_q15)));
        self.right_pwm = speed_to_pwm(q15_to_speed(i16::from_le(payload.right_q15)));
    }

    pub fn stop(&mut self) {
        self.left_pwm = 0;
        self.right_pwm = 0;
    }

    pub fn telemetry_payload(&self, forced_faults: u16) -> TelemetryPayload {
        let age_ms = self
            .last_cmd
            .map(|t| t.elapsed().as_millis().min(u16::MAX as u128) as u16)
            .unwrap_or(u16::MAX);

        let mut fault_flags = forced_faults;
        if (age_ms as u128) > FIRMWARE_WATCHDOG_MS {
            fault_flags |= FAULT_WATCHDOG;
        }
        if self.estop_latched {
            fault_flags |= FAULT_ESTOP_ACTIVE;
        }

        TelemetryPayload {
            left_pwm: self.left_pwm,
            right_pwm: self.right_pwm,
            bus_mv: 12_000,
            fault_flags,
            age_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::protocol::DriveCmdPayload;

    #[test]
    fn estop_flag_latches_zero_speed_and_fault_bit() {
        let mut m = MotorModel::default();
        let payload = DriveCmdPayload::new(0.8, 0.8, true, true);
        m.apply_drive_cmd(&payload, Instant::now());

        let telemetry = m.telemetry_payload(0);
        assert_eq!(telemetry.left_pwm, 0);
        assert_eq!(telemetry.right_pwm, 0);
        assert_ne!(telemetry.fault_flags & FAULT_ESTOP_ACTIVE, 0);
    }

    #[test]
    fn normal_command_maps_q15_to_pwm_range() {
        let mut m = MotorModel::default();
        let payload = DriveCmdPayload::new(0.5, -0.5, true, false);
        m.apply_drive_cmd(&payload, Instant::now());

        let telemetry = m.telemetry_payload(0);
        assert!((telemetry.left_pwm as f64 - 5000.0).abs() < 2.0);
        assert!((telemetry.right_pwm as f64 + 5000.0).abs() < 2.0);
    }

    #[test]
    fn no_command_ever_received_reports_max_age() {
        let m = MotorModel::default();
        let telemetry = m.telemetry_payload(0);
        assert_eq!(telemetry.age_ms, u16::MAX);
        assert_ne!(telemetry.fault_flags & FAULT_WATCHDOG, 0);
    }
}
