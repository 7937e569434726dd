//! Line-noise and fault-injection knobs, so the UART backend's parser and
//! watchdog can be exercised against more than a clean link.

use rand::Rng;
use rover_types::{FAULT_DRIVER, FAULT_ESTOP_ACTIVE, FAULT_OVERCURRENT, FAULT_OVERVOLT, FAULT_THERMAL, FAULT_UNDERVOLT, FAULT_WATCHDOG};

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    crc_corrupt_rate: f64,
    drop_rate: f64,
    pub forced_faults: u16,
}

impl Scenario {
    pub fn new(crc_corrupt_rate: f64, drop_rate: f64, forced_faults: u16) -> Self {
        Self { crc_corrupt_rate: crc_corrupt_rate.clamp(0.0, 1.0), drop_rate: drop_rate.clamp(0.0, 1.0), forced_faults }
    }

    pub fn should_drop(&self) -> bool {
        self.drop_rate > 0.0 && rand::thread_rng().gen_bool(self.drop_rate)
    }

    pub fn should_corrupt(&self) -> bool {
        self.crc_corrupt_rate > 0.0 && rand::thread_rng().gen_bool(self.crc_corrupt_rate)
    }
}

/// `clap` value parser for `--force-fault <name>`.
pub fn parse_fault_name(s: &str) -> Result<u16, String> {
    match s {
        "watchdog" => Ok(FAULT_WATCHDOG),
        "estop_active" => Ok(FAULT_ESTOP_ACTIVE),
        "undervolt" => Ok(FAULT_UNDERVOLT),
        "overvolt" => Ok(FAULT_OVERVOLT),
        "driver" => Ok(FAULT_DRIVER),
        "overcurrent" => Ok(FAULT_OVERCURRENT),
        "thermal" => Ok(FAULT_THERMAL),
        other => Err(format!(
            "unrecognized fault name {other:?} (expected one of: watchdog, estop_active, undervolt, overvolt, driver, overcurrent, thermal)"
        )),
    }
}
