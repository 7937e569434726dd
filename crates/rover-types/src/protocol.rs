//! Binary framed protocol to the motion MCU, plus the ASCII debug fallback.
//!
//! ```text
//! | 0xAA | 0x55 | version(1) | msg_type(1) | seq(1) | len(1) | payload[len] | crc16(2) |
//! ```
//!
//! CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no final
//! xor) is computed over `version..payload[len-1]` — header and payload,
//! never the two SOF bytes and never the CRC field itself.

use bytemuck::{Pod, Zeroable};

pub const SOF: [u8; 2] = [0xAA, 0x55];
pub const PROTOCOL_VERSION: u8 = 0x01;

const DRIVE_CMD_FLAG_ESTOP: u16 = 0x0001;
const DRIVE_CMD_FLAG_ENABLE_REQUEST: u16 = 0x0002;

// ── Message types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    DriveCmd,
    StopCmd,
    Telemetry,
    EncoderData,
    Heartbeat,
    ErrorReport,
    /// Anything not enumerated above — the parser accepts unknown message
    /// types (only the version byte causes a resync); dispatch simply logs
    /// and ignores them.
    Other(u8),
}

impl From<u8> for MsgType {
    fn from(v: u8) -> Self {
        match v {
            0x01 => MsgType::DriveCmd,
            0x02 => MsgType::StopCmd,
            0x10 => MsgType::Telemetry,
            0x11 => MsgType::EncoderData,
            0xFE => MsgType::Heartbeat,
            0xFF => MsgType::ErrorReport,
            other => MsgType::Other(other),
        }
    }
}

impl From<MsgType> for u8 {
    fn from(m: MsgType) -> u8 {
        match m {
            MsgType::DriveCmd => 0x01,
            MsgType::StopCmd => 0x02,
            MsgType::Telemetry => 0x10,
            MsgType::EncoderData => 0x11,
            MsgType::Heartbeat => 0xFE,
            MsgType::ErrorReport => 0xFF,
            MsgType::Other(v) => v,
        }
    }
}

// ── Q15 fixed point ────────────────────────────────────────────────────────────

/// `q15 = round(clamp(x, -1, 1) * 32767)`
pub fn speed_to_q15(x: f64) -> i16 {
    let clamped = x.clamp(-1.0, 1.0);
    (clamped * 32767.0).round() as i16
}

pub fn q15_to_speed(q: i16) -> f64 {
    q as f64 / 32767.0
}

// ── Wire payload structs (zero-copy via bytemuck, matches the firmware's C layout) ──

/// 6 bytes on the wire: `left_q15:i16 | right_q15:i16 | flags:u16`, all LE.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DriveCmdPayload {
    pub left_q15: i16,
    pub right_q15: i16,
    pub flags: u16,
}

impl DriveCmdPayload {
    pub fn new(left: f64, right: f64, enable_request: bool, estop: bool) -> Self {
        let mut flags = 0u16;
        if estop {
            flags |= DRIVE_CMD_FLAG_ESTOP;
        }
        if enable_request {
            flags |= DRIVE_CMD_FLAG_ENABLE_REQUEST;
        }
        Self {
            left_q15: speed_to_q15(left).to_le(),
            right_q15: speed_to_q15(right).to_le(),
            flags: flags.to_le(),
        }
    }

    pub fn estop(&self) -> bool {
        u16::from_le(self.flags) & DRIVE_CMD_FLAG_ESTOP != 0
    }

    pub fn enable_request(&self) -> bool {
        u16::from_le(self.flags) & DRIVE_CMD_FLAG_ENABLE_REQUEST != 0
    }

    pub fn to_bytes(self) -> [u8; 6] {
        bytemuck::bytes_of(&self).try_into().unwrap()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(data).ok()
    }
}

/// 10 bytes on the wire: `left_pwm:i16 | right_pwm:i16 | bus_mv:u16 | fault_flags:u16 | age_ms:u16`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TelemetryPayload {
    pub left_pwm: i16,
    pub right_pwm: i16,
    pub bus_mv: u16,
    pub fault_flags: u16,
    pub age_ms: u16,
}

impl TelemetryPayload {
    pub fn to_bytes(self) -> [u8; 10] {
        bytemuck::bytes_of(&self).try_into().unwrap()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(data).ok()
    }
}

/// 8 bytes on the wire: `left_ticks:i32 | right_ticks:i32`. Received and
/// length-validated but not acted upon in this release.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct EncoderDataPayload {
    pub left_ticks: i32,
    pub right_ticks: i32,
}

impl EncoderDataPayload {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(data).ok()
    }
}

/// Why a structurally-valid (CRC-correct) frame's payload couldn't be
/// interpreted as its declared message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadPayloadLen {
    pub msg_type: u8,
    pub expected: &'static [usize],
    pub got: usize,
}

/// Validate and decode a frame's payload against its declared `msg_type`.
/// `STOP_CMD`/`HEARTBEAT`/`ERROR_REPORT` carry no payload contract in this
/// release, so only their length (must be 0) is checked.
pub fn expected_payload_len(msg_type: MsgType) -> Option<&'static [usize]> {
    match msg_type {
        MsgType::DriveCmd => Some(&[6]),
        MsgType::Telemetry => Some(&[10]),
        MsgType::EncoderData => Some(&[8]),
        MsgType::StopCmd | MsgType::Heartbeat | MsgType::ErrorReport => Some(&[0]),
        MsgType::Other(_) => None,
    }
}

// ── CRC-16/CCITT-FALSE ─────────────────────────────────────────────────────────

pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// ── Frame ──────────────────────────────────────────────────────────────────────

/// A decoded, CRC-verified frame. Transient: reconstructed by the parser,
/// discarded once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub msg_type: u8,
    pub seq: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn msg_type(&self) -> MsgType {
        MsgType::from(self.msg_type)
    }
}

// ── Encoder ────────────────────────────────────────────────────────────────────

/// Stateful only in `seq`, which increments per encoded frame and wraps
/// modulo 256.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    seq: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self { seq: 0 }
    }

    pub fn encode(&mut self, msg_type: MsgType, payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= 255, "payload exceeds u8 length field");
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let mut header_and_payload = Vec::with_capacity(4 + payload.len());
        header_and_payload.push(PROTOCOL_VERSION);
        header_and_payload.push(u8::from(msg_type));
        header_and_payload.push(seq);
        header_and_payload.push(payload.len() as u8);
        header_and_payload.extend_from_slice(payload);

        let crc = crc16_ccitt_false(&header_and_payload);

        let mut frame = Vec::with_capacity(2 + header_and_payload.len() + 2);
        frame.extend_from_slice(&SOF);
        frame.extend_from_slice(&header_and_payload);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    pub fn encode_drive_cmd(&mut self, left: f64, right: f64, enable_request: bool, estop: bool) -> Vec<u8> {
        let payload = DriveCmdPayload::new(left, right, enable_request, estop).to_bytes();
        self.encode(MsgType::DriveCmd, &payload)
    }

    pub fn encode_telemetry(&mut self, payload: TelemetryPayload) -> Vec<u8> {
        self.encode(MsgType::Telemetry, &payload.to_bytes())
    }
}

// ── Byte-streaming parser ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ScanSof,
    Hdr,
    Payload,
    Crc,
}

/// Recovering byte-at-a-time frame parser. Any rejection (bad version, bad
/// CRC) unconditionally returns to `ScanSof` without peeking inside the
/// discarded bytes — the two-byte SOF window keeps sliding across whatever
/// comes next, so the parser always relocks given enough clean bytes.
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    scan_window: [u8; 2],
    /// `version, msg_type, seq, len` followed by up to `len` payload bytes —
    /// exactly the span the CRC is computed over.
    header_and_payload: Vec<u8>,
    len: u8,
    crc_buf: [u8; 2],
    crc_filled: usize,

    pub version_errors: u64,
    pub crc_errors: u64,
    pub frames_received: u64,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::ScanSof,
            scan_window: [0, 0],
            header_and_payload: Vec::with_capacity(8),
            len: 0,
            crc_buf: [0, 0],
            crc_filled: 0,
            version_errors: 0,
            crc_errors: 0,
            frames_received: 0,
        }
    }

    fn reset_to_scan(&mut self) {
        self.state = State::ScanSof;
        self.header_and_payload.clear();
        self.crc_filled = 0;
    }

    /// Feed one byte. Returns a `Frame` whenever one is fully decoded and
    /// its CRC matches. Never panics on any input.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::ScanSof => {
                self.scan_window = [self.scan_window[1], byte];
                if self.scan_window == SOF {
                    self.header_and_payload.clear();
                    self.state = State::Hdr;
                }
                None
            }
            State::Hdr => {
                self.header_and_payload.push(byte);
                if self.header_and_payload.len() < 4 {
                    return None;
                }
                let version = self.header_and_payload[0];
                self.len = self.header_and_payload[3];
                if version != PROTOCOL_VERSION {
                    self.version_errors += 1;
                    self.reset_to_scan();
                    return None;
                }
                if self.len == 0 {
                    self.crc_filled = 0;
                    self.state = State::Crc;
                } else {
                    self.state = State::Payload;
                }
                None
            }
            State::Payload => {
                self.header_and_payload.push(byte);
                if self.header_and_payload.len() == 4 + self.len as usize {
                    self.crc_filled = 0;
                    self.state = State::Crc;
                }
                None
            }
            State::Crc => {
                self.crc_buf[self.crc_filled] = byte;
                self.crc_filled += 1;
                if self.crc_filled < 2 {
                    return None;
                }
                let received = u16::from_le_bytes(self.crc_buf);
                let computed = crc16_ccitt_false(&self.header_and_payload);
                let frame = if computed == received {
                    self.frames_received += 1;
                    Some(Frame {
                        version: self.header_and_payload[0],
                        msg_type: self.header_and_payload[1],
                        seq: self.header_and_payload[2],
                        payload: self.header_and_payload[4..].to_vec(),
                    })
                } else {
                    self.crc_errors += 1;
                    None
                };
                self.reset_to_scan();
                frame
            }
        }
    }

    /// Feed a byte slice, collecting every frame decoded along the way —
    /// order preserved.
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }
}

// ── ASCII debug fallback ────────────────────────────────────────────────────────

/// Plain-text codec used only for manual debugging over a terminal; never
/// interleaved with the binary codec on a live link.
pub mod ascii {
    /// `D <l> <r>\n`
    pub fn encode_drive(left: f64, right: f64) -> String {
        format!("D {left:.4} {right:.4}\n")
    }

    /// `S\n`
    pub fn encode_stop() -> &'static str {
        "S\n"
    }

    /// `E\n`
    pub fn encode_estop() -> &'static str {
        "E\n"
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct AsciiTelemetry {
        pub left_pwm: i16,
        pub right_pwm: i16,
        pub bus_mv: u16,
        pub fault_flags: u16,
        pub age_ms: u16,
    }

    /// `T <left_pwm> <right_pwm> <bus_mv> <fault> <age>`
    pub fn parse_telemetry(line: &str) -> Option<AsciiTelemetry> {
        let mut parts = line.trim().split_whitespace();
        if parts.next()? != "T" {
            return None;
        }
        Some(AsciiTelemetry {
            left_pwm: parts.next()?.parse().ok()?,
            right_pwm: parts.next()?.parse().ok()?,
            bus_mv: parts.next()?.parse().ok()?,
            fault_flags: parts.next()?.parse().ok()?,
            age_ms: parts.next()?.parse().ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q15_round_trip_within_bound() {
        let mut x = -1.0;
        while x <= 1.0 {
            let back = q15_to_speed(speed_to_q15(x));
            assert!((back - x).abs() <= 1.0 / 32767.0 + 1e-12, "x={x} back={back}");
            x += 0.01;
        }
    }

    #[test]
    fn q15_saturates_at_bounds() {
        assert_eq!(speed_to_q15(1.0), 32767);
        assert_eq!(speed_to_q15(-1.0), -32767);
        assert_eq!(speed_to_q15(2.0), 32767);
        assert_eq!(speed_to_q15(-2.0), -32767);
    }

    #[test]
    fn crc_matches_known_vector() {
        // CRC-16/CCITT-FALSE("123456789") == 0x29B1, the standard check value.
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn encode_then_parse_round_trips() {
        let mut encoder = FrameEncoder::new();
        let bytes = encoder.encode_drive_cmd(0.5, -0.5, true, false);

        let mut parser = FrameParser::new();
        let frames = parser.push_bytes(&bytes);

        assert_eq!(frames.len(), 1);
        let f = &frames[0];
        assert_eq!(f.msg_type(), MsgType::DriveCmd);
        assert_eq!(f.seq, 0);
        let payload = DriveCmdPayload::from_bytes(&f.payload).unwrap();
        assert!((q15_to_speed(i16::from_le(payload.left_q15)) - 0.5).abs() < 1e-3);
        assert_eq!(parser.crc_errors, 0);
        assert_eq!(parser.version_errors, 0);
    }

    #[test]
    fn garbage_prefix_does_not_prevent_parse() {
        let mut encoder = FrameEncoder::new();
        let bytes = encoder.encode_drive_cmd(0.0, 0.0, false, false);

        let mut garbage = vec![0x00, 0xFF, 0xAA, 0x00, 0x55, 0x55, 0xAA];
        garbage.extend_from_slice(&bytes);

        let mut parser = FrameParser::new();
        let frames = parser.push_bytes(&garbage);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn resync_scenario_overlapping_sof() {
        // [0xAA, 0xAA, 0x55, <valid header/payload/CRC>] emits exactly one frame.
        let mut encoder = FrameEncoder::new();
        let telemetry = TelemetryPayload {
            left_pwm: 100,
            right_pwm: -100,
            bus_mv: 12000,
            fault_flags: 0,
            age_ms: 10,
        };
        let frame_bytes = encoder.encode_telemetry(telemetry);

        let mut input = vec![0xAA, 0xAA, 0x55];
        input.extend_from_slice(&frame_bytes);

        let mut parser = FrameParser::new();
        let frames = parser.push_bytes(&input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type(), MsgType::Telemetry);
    }

    #[test]
    fn bit_flip_in_payload_rejects_without_blocking_future_frames() {
        let mut encoder = FrameEncoder::new();
        let telemetry = TelemetryPayload {
            left_pwm: 1,
            right_pwm: 2,
            bus_mv: 3,
            fault_flags: 0,
            age_ms: 0,
        };
        let mut bad = encoder.encode_telemetry(telemetry);
        // Flip one bit inside the payload (index 6 is the first payload byte).
        bad[6] ^= 0x01;

        let good = encoder.encode_telemetry(telemetry);

        let mut parser = FrameParser::new();
        let mut all = bad.clone();
        all.extend_from_slice(&good);
        let frames = parser.push_bytes(&all);

        assert_eq!(frames.len(), 1);
        assert_eq!(parser.crc_errors, 1);
    }

    #[test]
    fn unknown_version_resyncs() {
        let mut encoder = FrameEncoder::new();
        let mut bytes = encoder.encode_drive_cmd(0.1, 0.1, true, false);
        bytes[2] = 0x02; // corrupt version byte
        let good = encoder.encode_drive_cmd(0.2, 0.2, true, false);

        let mut all = bytes;
        all.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let frames = parser.push_bytes(&all);
        assert_eq!(frames.len(), 1);
        assert_eq!(parser.version_errors, 1);
    }

    #[test]
    fn never_panics_on_arbitrary_bytes() {
        let mut parser = FrameParser::new();
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..10_000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let byte = (seed >> 16) as u8;
            parser.push_byte(byte);
        }
    }

    #[test]
    fn ascii_telemetry_round_trip() {
        let line = "T 100 -200 12000 3 42";
        let t = ascii::parse_telemetry(line).unwrap();
        assert_eq!(t.left_pwm, 100);
        assert_eq!(t.right_pwm, -200);
        assert_eq!(t.bus_mv, 12000);
        assert_eq!(t.fault_flags, 3);
        assert_eq!(t.age_ms, 42);
    }

    #[test]
    fn expected_payload_len_rejects_wrong_size() {
        assert_eq!(expected_payload_len(MsgType::DriveCmd), Some(&[6][..]));
        assert_eq!(expected_payload_len(MsgType::Heartbeat), Some(&[0][..]));
        assert_eq!(expected_payload_len(MsgType::Other(0x42)), None);
    }
}
