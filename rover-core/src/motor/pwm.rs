//! PWM (H-bridge) motor backend: drives two DC motors directly through six
//! GPIO lines and two hardware PWM channels. No telemetry, no link status —
//! this backend never returns either from the trait (`None` always).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rover_types::{BackendTag, DispatchState, DriveCommand, LinkStatus, MotorStatus, Telemetry};
use rppal::gpio::{Gpio, OutputPin};
use rppal::pwm::{Channel, Polarity, Pwm};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bus::Bus;
use crate::config::PiPwmConfig;
use crate::error::DispatchError;
use crate::motor::{dispatch_state, is_stale, MotorController};

/// Raspberry Pi (BCM2711) hardware PWM pin assignments. A configured ENA/ENB
/// pin outside this set cannot drive hardware PWM; that is a deployment
/// misconfiguration, not something the backend can work around, so it is
/// surfaced as a fatal config error at `start()`.
fn hw_pwm_channel(pin: u8) -> Option<Channel> {
    match pin {
        12 | 18 => Some(Channel::Pwm0),
        13 | 19 => Some(Channel::Pwm1),
        _ => None,
    }
}

struct GpioHandles {
    left_in1: OutputPin,
    left_in2: OutputPin,
    right_in3: OutputPin,
    right_in4: OutputPin,
    left_pwm: Pwm,
    right_pwm: Pwm,
}

/// One side's H-bridge mapping (§4.4.2): direction pins plus a duty cycle in
/// `[0, 100]`. `s = 0` (or anything inside the backend-local deadband) drives
/// both direction pins low and duty to zero.
fn drive_side(a: &mut OutputPin, b: &mut OutputPin, pwm: &Pwm, s: f64, deadband: f64) {
    let s = if s.abs() < deadband { 0.0 } else { s };
    if s > 0.0 {
        a.set_high();
        b.set_low();
    } else if s < 0.0 {
        a.set_low();
        b.set_high();
    } else {
        a.set_low();
        b.set_low();
    }
    let duty = (s.abs() * 100.0).min(100.0);
    if let Err(e) = pwm.set_duty_cycle(duty / 100.0) {
        warn!(error = %e, "pwm duty cycle write failed");
    }
}

fn drive_stop_row(gpio: &mut GpioHandles) {
    drive_side(&mut gpio.left_in1, &mut gpio.left_in2, &gpio.left_pwm, 0.0, 0.0);
    drive_side(&mut gpio.right_in3, &mut gpio.right_in4, &gpio.right_pwm, 0.0, 0.0);
}

struct Shared {
    current_command: RwLock<Option<(DriveCommand, Instant)>>,
    last_stale_warning: RwLock<Option<Instant>>,
    dispatch_state: RwLock<DispatchState>,
    last_command_applied_ms: AtomicU64,
    enabled: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            current_command: RwLock::new(None),
            last_stale_warning: RwLock::new(None),
            dispatch_state: RwLock::new(DispatchState::Idle),
            last_command_applied_ms: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
        }
    }
}

pub struct PwmBackend {
    bus: Arc<Bus>,
    pins: PiPwmConfig,
    shared: Arc<Shared>,
    gpio: Option<Arc<StdMutex<GpioHandles>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PwmBackend {
    pub fn new(bus: Arc<Bus>, pins: PiPwmConfig) -> Self {
        Self { bus, pins, shared: Arc::new(Shared::default()), gpio: None, tasks: Vec::new() }
    }

    fn acquire_gpio(pins: &PiPwmConfig) -> Result<GpioHandles, DispatchError> {
        let left_ena = pins.left_ena.expect("validated present at config load");
        let right_enb = pins.right_enb.expect("validated present at config load");

        let left_channel = hw_pwm_channel(left_ena).ok_or_else(|| {
            DispatchError::Config(format!("pin {left_ena} (control.pi_pwm.left_ena) is not a hardware PWM pin"))
        })?;
        let right_channel = hw_pwm_channel(right_enb).ok_or_else(|| {
            DispatchError::Config(format!("pin {right_enb} (control.pi_pwm.right_enb) is not a hardware PWM pin"))
        })?;

        let gpio = Gpio::new().map_err(|e| DispatchError::GpioClaim { source: e })?;
        let mut left_in1 = gpio
            .get(pins.left_in1.expect("validated"))
            .map_err(|e| DispatchError::GpioClaim { source: e })?
            .into_output();
        let mut left_in2 = gpio
            .get(pins.left_in2.expect("validated"))
            .map_err(|e| DispatchError::GpioClaim { source: e })?
            .into_output();
        let mut right_in3 = gpio
            .get(pins.right_in3.expect("validated"))
            .map_err(|e| DispatchError::GpioClaim { source: e })?
            .into_output();
        let mut right_in4 = gpio
            .get(pins.right_in4.expect("validated"))
            .map_err(|e| DispatchError::GpioClaim { source: e })?
            .into_output();

        // Drive all direction pins low before PWM is enabled (§6).
        left_in1.set_low();
        left_in2.set_low();
        right_in3.set_low();
        right_in4.set_low();

        let left_pwm = Pwm::with_frequency(left_channel, pins.pwm_frequency as f64, 0.0, Polarity::Normal, true)
            .map_err(|e| DispatchError::HardwareOpen { source: std::io::Error::new(std::io::ErrorKind::Other, e) })?;
        let right_pwm = Pwm::with_frequency(right_channel, pins.pwm_frequency as f64, 0.0, Polarity::Normal, true)
            .map_err(|e| DispatchError::HardwareOpen { source: std::io::Error::new(std::io::ErrorKind::Other, e) })?;

        Ok(GpioHandles { left_in1, left_in2, right_in3, right_in4, left_pwm, right_pwm })
    }

    async fn listener_task(
        shared: Arc<Shared>,
        bus: Arc<Bus>,
        gpio: Arc<StdMutex<GpioHandles>>,
        max_age: Duration,
        deadband: f64,
    ) {
        let mut sub = bus.subscribe::<DriveCommand>("drive_command").await;
        loop {
            match tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
                Ok(Some(cmd)) => {
                    *shared.current_command.write().await = Some((cmd, Instant::now()));
                    shared
                        .last_command_applied_ms
                        .store(cmd.ts.timestamp_millis().max(0) as u64, Ordering::Relaxed);

                    let active = cmd.enable_request && !cmd.estop;
                    shared.enabled.store(active, Ordering::Relaxed);
                    {
                        let mut state = shared.dispatch_state.write().await;
                        if *state != DispatchState::Stopping {
                            *state = dispatch_state(true, active, false);
                        }
                    }

                    let gpio = gpio.clone();
                    let (left, right) = if active { (cmd.left, cmd.right) } else { (0.0, 0.0) };
                    let _ = tokio::task::spawn_blocking(move || {
                        let mut g = gpio.lock().expect("gpio mutex poisoned");
                        drive_side(&mut g.left_in1, &mut g.left_in2, &g.left_pwm, left, deadband);
                        drive_side(&mut g.right_in3, &mut g.right_in4, &g.right_pwm, right, deadband);
                    })
                    .await;
                }
                Ok(None) => break,
                Err(_) => {
                    let snapshot = *shared.current_command.read().await;
                    let stale = match snapshot {
                        Some((_, ts)) => is_stale(ts, Instant::now(), max_age),
                        None => true,
                    };
                    if stale {
                        let mut last_warn = shared.last_stale_warning.write().await;
                        let should_warn = last_warn.map(|t| t.elapsed() >= super::STALE_WARNING_THROTTLE).unwrap_or(true);
                        if should_warn {
                            warn!("stale drive_command on pi_pwm backend, stopping motors");
                            *last_warn = Some(Instant::now());
                        }
                        shared.enabled.store(false, Ordering::Relaxed);
                        {
                            let mut state = shared.dispatch_state.write().await;
                            if *state != DispatchState::Stopping {
                                *state = dispatch_state(true, false, false);
                            }
                        }
                        let gpio = gpio.clone();
                        let _ = tokio::task::spawn_blocking(move || {
                            let mut g = gpio.lock().expect("gpio mutex poisoned");
                            drive_stop_row(&mut g);
                        })
                        .await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MotorController for PwmBackend {
    async fn start(&mut self) -> Result<(), DispatchError> {
        let handles = Self::acquire_gpio(&self.pins)?;
        let gpio = Arc::new(StdMutex::new(handles));
        self.gpio = Some(gpio.clone());
        *self.shared.dispatch_state.write().await = DispatchState::RunningSafe;

        let max_age = Duration::from_millis(self.pins.max_command_age_ms);
        let deadband = self.pins.deadband;
        let task = tokio::spawn(Self::listener_task(self.shared.clone(), self.bus.clone(), gpio, max_age, deadband));
        self.tasks = vec![task];
        Ok(())
    }

    async fn stop(&mut self) {
        *self.shared.dispatch_state.write().await = DispatchState::Stopping;

        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        if let Some(gpio) = self.gpio.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let mut g = gpio.lock().expect("gpio mutex poisoned");
                drive_stop_row(&mut g);
                // `Pwm`/`OutputPin` release their resources on drop.
            })
            .await;
        }

        self.shared.enabled.store(false, Ordering::Relaxed);
        *self.shared.dispatch_state.write().await = DispatchState::Idle;
    }

    async fn submit(&self, cmd: DriveCommand) {
        *self.shared.current_command.write().await = Some((cmd, Instant::now()));
        self.shared
            .last_command_applied_ms
            .store(cmd.ts.timestamp_millis().max(0) as u64, Ordering::Relaxed);
    }

    async fn status(&self) -> MotorStatus {
        MotorStatus {
            enabled: self.shared.enabled.load(Ordering::Relaxed),
            last_command_ts_ms: self.shared.last_command_applied_ms.load(Ordering::Relaxed),
            has_fault: false,
            backend_tag: BackendTag::PiPwm,
        }
    }

    async fn telemetry(&self) -> Option<Telemetry> {
        None
    }

    async fn link_status(&self) -> Option<LinkStatus> {
        None
    }
}
