//! Stand-in motion MCU for bench testing the UART backend and its parser
//! without real motor hardware. Opens the *other* end of a serial link
//! (e.g. one side of a `socat` pty pair), decodes `DRIVE_CMD` frames the way
//! the real firmware would, and replies with synthetic `TELEMETRY` at a
//! fixed cadence — optionally corrupting or dropping frames on the way out
//! to exercise the parser's resync behavior under line noise.
//!
//! This plays the role the teacher's own hardware simulator plays for its
//! radio hub: a development-only binary that speaks a real wire protocol
//! well enough to drive the production code path end-to-end.

mod model;
mod scenario;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rover_types::protocol::{expected_payload_len, DriveCmdPayload, FrameEncoder, FrameParser, MsgType};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use model::MotorModel;
use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "rover-mcu-sim", about = "Stand-in motion MCU speaking the rover UART protocol")]
struct Args {
    /// Serial device path to open (the simulator's end of the link).
    #[arg(short, long)]
    port: String,

    #[arg(long, default_value_t = 115_200)]
    baudrate: u32,

    /// How often to emit a TELEMETRY frame.
    #[arg(long, default_value_t = 20)]
    telemetry_hz: u32,

    /// Fraction of outbound telemetry frames to corrupt a CRC bit in,
    /// simulating line noise. 0.0 disables.
    #[arg(long, default_value_t = 0.0)]
    crc_corrupt_rate: f64,

    /// Fraction of outbound telemetry frames to drop entirely.
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Force a fault flag to stay set regardless of commanded state — see
    /// `scenario::Scenario::parse_fault_name` for accepted names
    /// (watchdog, estop_active, undervolt, overvolt, driver, overcurrent,
    /// thermal). May be repeated.
    #[arg(long = "force-fault", value_parser = scenario::parse_fault_name)]
    forced_faults: Vec<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rover_mcu_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let forced_fault_bits = args.forced_faults.iter().fold(0u16, |acc, b| acc | b);
    let scenario = Scenario::new(args.crc_corrupt_rate, args.drop_rate, forced_fault_bits);

    info!(
        port = %args.port,
        baudrate = args.baudrate,
        telemetry_hz = args.telemetry_hz,
        "rover-mcu-sim opening link"
    );

    let port = tokio_serial::new(&args.port, args.baudrate)
        .timeout(Duration::from_millis(100))
        .open_native_async()?;
    let (mut read_half, write_half) = split(port);
    let write_half = Arc::new(Mutex::new(write_half));

    let model = Arc::new(Mutex::new(MotorModel::default()));
    let period = Duration::from_secs_f64(1.0 / (args.telemetry_hz.max(1) as f64));

    let sender = {
        let model = model.clone();
        let write_half = write_half.clone();
        tokio::spawn(async move {
            let mut encoder = FrameEncoder::new();
            // Default missed-tick behavior (`Burst`) catches up immediately
            // on an overrun rather than sleeping a full extra period.
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let payload = { model.lock().await.telemetry_payload(scenario.forced_faults) };
                let mut frame = encoder.encode_telemetry(payload);

                if scenario.should_drop() {
                    debug!("scenario: dropping outbound telemetry frame");
                    continue;
                }
                if scenario.should_corrupt() {
                    let flip_index = 6 + (frame.len() - 8) / 2; // inside the payload span
                    frame[flip_index] ^= 0x01;
                    debug!("scenario: corrupting one payload bit before send");
                }

                let mut port = write_half.lock().await;
                if let Err(e) = tokio::time::timeout(Duration::from_millis(500), port.write_all(&frame)).await {
                    warn!(error = %e, "telemetry write timed out");
                }
            }
        })
    };

    let mut parser = FrameParser::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match tokio::time::timeout(Duration::from_millis(100), read_half.read(&mut buf)).await {
            Ok(Ok(0)) => {
                warn!("link closed (EOF)");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(error = %e, "read error");
                continue;
            }
            Err(_) => continue,
        };

        for frame in parser.push_bytes(&buf[..n]) {
            let msg_type = frame.msg_type();
            let expected = expected_payload_len(msg_type);
            if expected.is_some_and(|lens| !lens.contains(&frame.payload.len())) {
                warn!(?msg_type, len = frame.payload.len(), "unexpected payload length, ignoring frame");
                continue;
            }

            match msg_type {
                MsgType::DriveCmd => {
                    if let Some(payload) = DriveCmdPayload::from_bytes(&frame.payload) {
                        let mut m = model.lock().await;
                        m.apply_drive_cmd(&payload, Instant::now());
                        debug!(left = i16::from_le(payload.left_q15), right = i16::from_le(payload.right_q15), "drive_cmd applied");
                    }
                }
                MsgType::StopCmd => {
                    model.lock().await.stop();
                    debug!("stop_cmd applied");
                }
                other => debug!(?other, "ignoring frame type"),
            }
        }
    }

    sender.abort();
    Ok(())
}
