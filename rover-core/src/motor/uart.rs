//! UART motor backend: talks the binary framed protocol to the motion MCU
//! over an exclusive serial port.
//!
//! Three cooperating tasks share state only through [`Shared`], guarded by
//! short-lived `RwLock`/`Mutex` sections that are never held across an
//! `.await` on I/O:
//!
//! - **subscriber** — drains `drive_command` off the bus, replaces the
//!   current-command slot.
//! - **sender** — fixed-period transmit loop; snapshots the current command,
//!   applies the stale-command watchdog, encodes and writes a `DRIVE_CMD`
//!   frame.
//! - **receiver** — drains serial input, feeds the byte-streaming parser,
//!   dispatches decoded frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rover_types::protocol::{expected_payload_len, EncoderDataPayload, FrameEncoder, FrameParser, MsgType, TelemetryPayload};
use rover_types::{BackendTag, DispatchState, DriveCommand, LinkStatus, MotorStatus, Telemetry};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, warn};

use crate::bus::Bus;
use crate::error::DispatchError;
use crate::motor::{dispatch_state, is_stale, MotorController};

struct LinkCounters {
    connected: bool,
    frames_sent: u64,
    frames_received: u64,
    crc_errors: u64,
    version_errors: u64,
    decode_errors: u64,
    last_telemetry_ts_ms: u64,
    last_command_ts_ms: u64,
}

impl Default for LinkCounters {
    fn default() -> Self {
        Self {
            connected: false,
            frames_sent: 0,
            frames_received: 0,
            crc_errors: 0,
            version_errors: 0,
            decode_errors: 0,
            last_telemetry_ts_ms: 0,
            last_command_ts_ms: 0,
        }
    }
}

struct Shared {
    current_command: RwLock<Option<(DriveCommand, Instant)>>,
    last_stale_warning: RwLock<Option<Instant>>,
    telemetry: RwLock<Option<Telemetry>>,
    link: RwLock<LinkCounters>,
    dispatch_state: RwLock<DispatchState>,
    last_command_applied_ms: AtomicU64,
    enabled: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            current_command: RwLock::new(None),
            last_stale_warning: RwLock::new(None),
            telemetry: RwLock::new(None),
            link: RwLock::new(LinkCounters::default()),
            dispatch_state: RwLock::new(DispatchState::Idle),
            last_command_applied_ms: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
        }
    }
}

async fn apply_command(shared: &Shared, cmd: DriveCommand) {
    *shared.current_command.write().await = Some((cmd, Instant::now()));
    shared
        .last_command_applied_ms
        .store(cmd.ts.timestamp_millis().max(0) as u64, Ordering::Relaxed);
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub struct UartBackend {
    bus: Arc<Bus>,
    port_path: String,
    baudrate: u32,
    command_period: Duration,
    max_command_age: Duration,
    shared: Arc<Shared>,
    write_half: Arc<Mutex<Option<WriteHalf<SerialStream>>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl UartBackend {
    pub fn new(bus: Arc<Bus>, port_path: String, baudrate: u32, command_rate_hz: u32, max_command_age_ms: u64) -> Self {
        Self {
            bus,
            port_path,
            baudrate,
            command_period: Duration::from_secs_f64(1.0 / command_rate_hz.max(1) as f64),
            max_command_age: Duration::from_millis(max_command_age_ms),
            shared: Arc::new(Shared::default()),
            write_half: Arc::new(Mutex::new(None)),
            tasks: Vec::new(),
        }
    }

    async fn subscriber_task(shared: Arc<Shared>, bus: Arc<Bus>) {
        let mut sub = bus.subscribe::<DriveCommand>("drive_command").await;
        while let Some(cmd) = sub.recv().await {
            apply_command(&shared, cmd).await;
        }
    }

    async fn sender_task(shared: Arc<Shared>, write_half: Arc<Mutex<Option<WriteHalf<SerialStream>>>>, period: Duration, max_age: Duration) {
        let mut encoder = FrameEncoder::new();
        // Default missed-tick behavior (`Burst`) fires an overrun tick
        // immediately instead of sleeping a full extra period, matching the
        // catch-up-no-sleep-on-overrun cadence and the Python sender's
        // `sleep(max(0, period - elapsed))`.
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;

            let snapshot = *shared.current_command.read().await;
            let (effective, stale) = match snapshot {
                Some((cmd, ts)) => {
                    let stale = is_stale(ts, Instant::now(), max_age);
                    if stale {
                        (DriveCommand::safe_stop(Utc::now()), true)
                    } else {
                        (cmd, false)
                    }
                }
                None => (DriveCommand::safe_stop(Utc::now()), true),
            };

            if stale {
                let mut last_warn = shared.last_stale_warning.write().await;
                let should_warn = last_warn.map(|t| t.elapsed() >= super::STALE_WARNING_THROTTLE).unwrap_or(true);
                if should_warn {
                    warn!("stale drive_command, substituting safe zero-speed stop");
                    *last_warn = Some(Instant::now());
                }
            }

            let active = !stale && effective.enable_request && !effective.estop;
            {
                let mut state = shared.dispatch_state.write().await;
                if *state != DispatchState::Stopping {
                    *state = dispatch_state(true, active, false);
                }
            }
            shared.enabled.store(active, Ordering::Relaxed);

            let frame = encoder.encode_drive_cmd(effective.left, effective.right, effective.enable_request, effective.estop);

            let mut guard = write_half.lock().await;
            let Some(port) = guard.as_mut() else { continue };
            match tokio::time::timeout(Duration::from_millis(500), port.write_all(&frame)).await {
                Ok(Ok(())) => {
                    let mut link = shared.link.write().await;
                    link.connected = true;
                    link.frames_sent += 1;
                    link.last_command_ts_ms = now_ms();
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "uart write error");
                    shared.link.write().await.connected = false;
                }
                Err(_) => {
                    warn!("uart write timed out after 500ms");
                    shared.link.write().await.connected = false;
                }
            }
        }
    }

    async fn receiver_task(shared: Arc<Shared>, bus: Arc<Bus>, mut read_half: ReadHalf<SerialStream>) {
        let mut parser = FrameParser::new();
        let mut buf = [0u8; 256];
        loop {
            let read = tokio::time::timeout(Duration::from_millis(100), read_half.read(&mut buf)).await;
            let n = match read {
                Ok(Ok(0)) => {
                    warn!("uart read returned EOF");
                    continue;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(error = %e, "uart read error");
                    continue;
                }
                Err(_) => continue, // poll timeout, no bytes available yet
            };

            for frame in parser.push_bytes(&buf[..n]) {
                let msg_type = frame.msg_type();
                let expected = expected_payload_len(msg_type);
                let len_ok = expected.map(|lens| lens.contains(&frame.payload.len())).unwrap_or(true);
                if !len_ok {
                    shared.link.write().await.decode_errors += 1;
                    warn!(?msg_type, len = frame.payload.len(), "unexpected payload length");
                    continue;
                }

                match msg_type {
                    MsgType::Telemetry => {
                        if let Some(payload) = TelemetryPayload::from_bytes(&frame.payload) {
                            let telemetry = Telemetry {
                                left_pwm: i16::from_le(payload.left_pwm),
                                right_pwm: i16::from_le(payload.right_pwm),
                                bus_mv: u16::from_le(payload.bus_mv),
                                fault_flags: u16::from_le(payload.fault_flags),
                                age_ms: u16::from_le(payload.age_ms),
                                ts: Utc::now(),
                            };
                            *shared.telemetry.write().await = Some(telemetry);
                            bus.publish("telemetry", telemetry).await;
                        } else {
                            shared.link.write().await.decode_errors += 1;
                        }
                    }
                    MsgType::EncoderData => {
                        if let Some(payload) = EncoderDataPayload::from_bytes(&frame.payload) {
                            debug!(left_ticks = payload.left_ticks, right_ticks = payload.right_ticks, "encoder data received, not acted upon");
                        }
                    }
                    other => {
                        debug!(?other, "ignoring frame type");
                    }
                }
            }

            let mut link = shared.link.write().await;
            link.frames_received = parser.frames_received;
            link.crc_errors = parser.crc_errors;
            link.version_errors = parser.version_errors;
            if link.frames_received > 0 {
                link.last_telemetry_ts_ms = now_ms();
            }
        }
    }
}

#[async_trait]
impl MotorController for UartBackend {
    async fn start(&mut self) -> Result<(), DispatchError> {
        let port_path = self.port_path.clone();
        let baudrate = self.baudrate;
        let port = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&port_path, baudrate)
                .timeout(Duration::from_millis(100))
                .open_native_async()
        })
        .await
        .map_err(|e| DispatchError::HardwareOpen { source: std::io::Error::new(std::io::ErrorKind::Other, e) })?
        .map_err(|e| DispatchError::HardwareOpen { source: std::io::Error::new(std::io::ErrorKind::Other, e) })?;

        let (read_half, write_half) = split(port);
        *self.write_half.lock().await = Some(write_half);
        *self.shared.dispatch_state.write().await = DispatchState::RunningSafe;

        let subscriber = tokio::spawn(Self::subscriber_task(self.shared.clone(), self.bus.clone()));
        let sender = tokio::spawn(Self::sender_task(self.shared.clone(), self.write_half.clone(), self.command_period, self.max_command_age));
        let receiver = tokio::spawn(Self::receiver_task(self.shared.clone(), self.bus.clone(), read_half));

        self.tasks = vec![subscriber, sender, receiver];
        Ok(())
    }

    async fn stop(&mut self) {
        *self.shared.dispatch_state.write().await = DispatchState::Stopping;

        if let Some(port) = self.write_half.lock().await.as_mut() {
            let mut encoder = FrameEncoder::new();
            let frame = encoder.encode_drive_cmd(0.0, 0.0, false, false);
            if let Err(e) = tokio::time::timeout(Duration::from_millis(500), port.write_all(&frame)).await {
                warn!(error = %e, "final stop frame did not send within the write timeout");
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        *self.write_half.lock().await = None;
        self.shared.enabled.store(false, Ordering::Relaxed);
        *self.shared.dispatch_state.write().await = DispatchState::Idle;
    }

    async fn submit(&self, cmd: DriveCommand) {
        apply_command(&self.shared, cmd).await;
    }

    async fn status(&self) -> MotorStatus {
        let telemetry = *self.shared.telemetry.read().await;
        MotorStatus {
            enabled: self.shared.enabled.load(Ordering::Relaxed),
            last_command_ts_ms: self.shared.last_command_applied_ms.load(Ordering::Relaxed),
            has_fault: telemetry.is_some_and(|t| t.any_fault()),
            backend_tag: BackendTag::Uart,
        }
    }

    async fn telemetry(&self) -> Option<Telemetry> {
        *self.shared.telemetry.read().await
    }

    async fn link_status(&self) -> Option<LinkStatus> {
        let link = self.shared.link.read().await;
        Some(LinkStatus {
            connected: link.connected,
            frames_sent: link.frames_sent,
            frames_received: link.frames_received,
            crc_errors: link.crc_errors,
            version_errors: link.version_errors,
            decode_errors: link.decode_errors,
            last_telemetry_ts_ms: link.last_telemetry_ts_ms,
            last_command_ts_ms: link.last_command_ts_ms,
        })
    }
}

impl Drop for UartBackend {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            error!("UartBackend dropped without calling stop() first; tasks were aborted, not cleanly stopped");
            for task in &self.tasks {
                task.abort();
            }
        }
    }
}
