//! Teleop transformation: raw operator intent to shaped wheel-speed commands.
//!
//! Four steps applied in order: deadband re-scaling, differential mix with
//! magnitude clipping, scale, and per-axis slew limiting. A single consumer
//! of `teleop_input`, a single publisher of `drive_command`; nothing here is
//! shared across `Shaper` instances.

use std::time::Instant;

use chrono::Utc;
use rover_types::{DriveCommand, DriveSource, TeleopInput};

use crate::config::TeleopConfig;

pub struct Shaper {
    max_speed: f64,
    deadband: f64,
    slew_rate_per_sec: f64,
    /// Previous published output, per axis, and when it was produced.
    /// Initialized to zero at construction (mirroring the original
    /// `teleop_service.py`, which sets `current_left/right=0` and
    /// `last_update_time` in its constructor) so the very first input is
    /// slewed up from a standing start rather than jumping straight to
    /// its unslewed target.
    prev: (f64, f64, Instant),
}

impl Shaper {
    pub fn new(cfg: &TeleopConfig) -> Self {
        Self {
            max_speed: cfg.max_speed,
            deadband: cfg.deadband,
            slew_rate_per_sec: cfg.slew_rate_per_sec,
            prev: (0.0, 0.0, Instant::now()),
        }
    }

    fn apply_deadband(&self, x: f64) -> f64 {
        if x.abs() < self.deadband {
            0.0
        } else {
            x.signum() * (x.abs() - self.deadband) / (1.0 - self.deadband)
        }
    }

    fn slew_limit(&self, prev: f64, target: f64, dt_secs: f64) -> f64 {
        let max_step = self.slew_rate_per_sec * dt_secs;
        let delta = target - prev;
        if delta.abs() <= max_step {
            target
        } else {
            prev + max_step.copysign(delta)
        }
    }

    /// Transform one `TeleopInput` into a `DriveCommand`. `now` drives both
    /// the slew `dt` measurement and the output timestamp; passed in rather
    /// than read from the clock so this stays a pure function callers can
    /// drive at a fixed cadence in tests.
    pub fn shape(&mut self, input: TeleopInput, now: Instant) -> DriveCommand {
        let input = input.clamped();

        let throttle = self.apply_deadband(input.throttle);
        let turn = self.apply_deadband(input.turn);

        let mut left = throttle + turn;
        let mut right = throttle - turn;
        let peak = left.abs().max(right.abs());
        if peak > 1.0 {
            left /= peak;
            right /= peak;
        }

        left *= self.max_speed;
        right *= self.max_speed;

        let (prev_left, prev_right, prev_ts) = self.prev;
        let dt = now.saturating_duration_since(prev_ts).as_secs_f64();
        let (left, right) = (
            self.slew_limit(prev_left, left, dt),
            self.slew_limit(prev_right, right, dt),
        );

        self.prev = if input.estop {
            // An e-stop is an immediate override, not a slewed target: the
            // command itself carries zero speed, and the shaper's memory is
            // reset so that a later release of e-stop slews up from zero
            // rather than snapping back to the stale pre-estop target.
            (0.0, 0.0, now)
        } else {
            (left, right, now)
        };

        let (out_left, out_right) = if input.estop { (0.0, 0.0) } else { (left, right) };

        DriveCommand {
            left: out_left,
            right: out_right,
            enable_request: input.enable,
            estop: input.estop,
            ts: Utc::now(),
            source: DriveSource::Teleop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_speed: f64, deadband: f64, slew_rate_per_sec: f64) -> TeleopConfig {
        TeleopConfig { max_speed, deadband, slew_rate_per_sec }
    }

    fn input(throttle: f64, turn: f64) -> TeleopInput {
        TeleopInput { throttle, turn, enable: true, estop: false, ts: Utc::now() }
    }

    #[test]
    fn deadband_edge_maps_to_zero_and_rescales_above_it() {
        let mut shaper = Shaper::new(&cfg(1.0, 0.05, 100.0));
        let t0 = Instant::now();

        let cmd = shaper.shape(input(0.05, 0.0), t0);
        assert_eq!(cmd.left, 0.0);
        assert_eq!(cmd.right, 0.0);

        let cmd = shaper.shape(input(1.0, 0.0), t0 + std::time::Duration::from_secs(1));
        // (1 - 0.05) / (1 - 0.05) = 1.0, full range reached at input 1.0.
        assert!((cmd.left - 1.0).abs() < 1e-9);
        assert!((cmd.right - 1.0).abs() < 1e-9);
    }

    #[test]
    fn differential_mix_saturates_preserving_direction() {
        // A full second past construction keeps the slew from clipping this
        // mix/saturation check, which isn't exercising slew at all.
        let t0 = Instant::now() + std::time::Duration::from_secs(1);

        let mut shaper = Shaper::new(&cfg(1.0, 0.0, 100.0));
        let cmd = shaper.shape(input(1.0, 1.0), t0);
        assert!((cmd.left - 1.0).abs() < 1e-9);
        assert!((cmd.right - 0.0).abs() < 1e-9);

        let mut shaper = Shaper::new(&cfg(1.0, 0.0, 100.0));
        let cmd = shaper.shape(input(1.0, -1.0), t0);
        assert!((cmd.left - 0.0).abs() < 1e-9);
        assert!((cmd.right - 1.0).abs() < 1e-9);
    }

    #[test]
    fn scenario_straight_forward() {
        // max_speed=1.0, deadband=0.05, slew=2.0; target = (0.5-0.05)/0.95 = 0.4737.
        let t_construct = Instant::now();
        let mut shaper = Shaper::new(&cfg(1.0, 0.05, 2.0));

        // The first operator input arrives 0.1s after the shaper was built;
        // the slew memory starts at zero (set at construction), so this
        // first output is limited to 2.0/s * 0.1s = 0.2, not the full target.
        let t0 = t_construct + std::time::Duration::from_millis(100);
        let cmd = shaper.shape(input(0.5, 0.0), t0);
        assert!((cmd.left - 0.2).abs() < 1e-6, "left={}", cmd.left);
        assert!((cmd.right - 0.2).abs() < 1e-6, "right={}", cmd.right);

        // Re-feed the same input at 0.1s steps; by t=0.3s since construction
        // the slew has reached the 0.4737 target.
        let mut cmd = cmd;
        let mut t = t0;
        for _ in 0..2 {
            t += std::time::Duration::from_millis(100);
            cmd = shaper.shape(input(0.5, 0.0), t);
        }
        assert!((cmd.left - 0.4737).abs() < 1e-3, "left={}", cmd.left);
        assert!((cmd.right - 0.4737).abs() < 1e-3, "right={}", cmd.right);
    }

    #[test]
    fn scenario_pure_spin_reaches_steady_state() {
        let mut shaper = Shaper::new(&cfg(1.0, 0.05, 2.0));
        let mut t = Instant::now();
        let mut cmd = shaper.shape(input(0.0, 1.0), t);
        for _ in 0..10 {
            t += std::time::Duration::from_millis(100);
            cmd = shaper.shape(input(0.0, 1.0), t);
        }
        assert!((cmd.left - 1.0).abs() < 1e-6);
        assert!((cmd.right - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn slew_bound_is_never_exceeded() {
        let mut shaper = Shaper::new(&cfg(1.0, 0.0, 2.0));
        let t0 = Instant::now();
        let first = shaper.shape(input(1.0, 0.0), t0);
        let dt = std::time::Duration::from_millis(50);
        let second = shaper.shape(input(-1.0, 0.0), t0 + dt);
        let max_step = 2.0 * dt.as_secs_f64() + 1e-9;
        assert!((second.left - first.left).abs() <= max_step);
    }

    #[test]
    fn estop_overrides_output_and_resets_slew_memory() {
        let mut shaper = Shaper::new(&cfg(1.0, 0.0, 2.0));
        let t0 = Instant::now();
        shaper.shape(input(1.0, 0.0), t0);

        let estop_input = TeleopInput { throttle: 1.0, turn: 0.0, enable: true, estop: true, ts: Utc::now() };
        let cmd = shaper.shape(estop_input, t0 + std::time::Duration::from_millis(10));
        assert_eq!(cmd.left, 0.0);
        assert_eq!(cmd.right, 0.0);
        assert!(cmd.estop);

        // Releasing e-stop slews up from zero, not a snap back toward 1.0.
        let release = shaper.shape(input(1.0, 0.0), t0 + std::time::Duration::from_millis(60));
        let max_step = 2.0 * 0.05 + 1e-6;
        assert!(release.left <= max_step, "left={}", release.left);
    }
}
