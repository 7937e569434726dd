//! Process configuration, loaded from a TOML file given on the CLI.
//!
//! Every field defaults if absent from the file (or if the file itself is
//! absent) except the handful that genuinely have no safe default: which
//! backend to run, and that backend's hardware addressing (serial port path
//! or GPIO pin numbers). Those are checked in `Config::validate`, not by
//! `serde`, so a misconfigured file produces one clear `DispatchError::Config`
//! instead of a deserialization error pointing at the wrong field.

use serde::Deserialize;

use crate::error::DispatchError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control: ControlConfig,
    pub uart: UartConfig,
    pub hardware_gateway: HardwareGatewayConfig,
    pub teleop: TeleopConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            uart: UartConfig::default(),
            hardware_gateway: HardwareGatewayConfig::default(),
            teleop: TeleopConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| DispatchError::Config(format!("{path}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(DispatchError::Config(format!("{path}: {e}")).into()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), DispatchError> {
        match self.control.backend.as_str() {
            "uart" => {
                if self.uart.port.is_empty() {
                    return Err(DispatchError::Config(
                        "uart.port is required when control.backend = \"uart\"".into(),
                    ));
                }
            }
            "pi_pwm" => {
                let p = &self.control.pi_pwm;
                if [p.left_in1, p.left_in2, p.left_ena, p.right_in3, p.right_in4, p.right_enb]
                    .iter()
                    .any(|pin| pin.is_none())
                {
                    return Err(DispatchError::Config(
                        "control.pi_pwm.{left_in1,left_in2,left_ena,right_in3,right_in4,right_enb} are all required when control.backend = \"pi_pwm\"".into(),
                    ));
                }
            }
            other => {
                return Err(DispatchError::Config(format!(
                    "unrecognized control.backend {other:?} (expected \"uart\" or \"pi_pwm\")"
                )))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// No default: a missing or unrecognized backend is a fatal config error.
    pub backend: String,
    pub pi_pwm: PiPwmConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { backend: String::new(), pi_pwm: PiPwmConfig::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PiPwmConfig {
    pub left_in1: Option<u8>,
    pub left_in2: Option<u8>,
    pub left_ena: Option<u8>,
    pub right_in3: Option<u8>,
    pub right_in4: Option<u8>,
    pub right_enb: Option<u8>,
    pub pwm_frequency: u32,
    pub max_command_age_ms: u64,
    pub deadband: f64,
}

impl Default for PiPwmConfig {
    fn default() -> Self {
        Self {
            left_in1: None,
            left_in2: None,
            left_ena: None,
            right_in3: None,
            right_in4: None,
            right_enb: None,
            pwm_frequency: default_pwm_frequency(),
            max_command_age_ms: default_max_command_age_ms(),
            deadband: default_pwm_deadband(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UartConfig {
    /// No default: required when `control.backend = "uart"`.
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self { port: String::new(), baudrate: default_baudrate() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardwareGatewayConfig {
    #[serde(default = "default_command_rate_hz")]
    pub command_rate_hz: u32,
    #[serde(default = "default_max_command_age_ms")]
    pub max_command_age_ms: u64,
}

impl Default for HardwareGatewayConfig {
    fn default() -> Self {
        Self {
            command_rate_hz: default_command_rate_hz(),
            max_command_age_ms: default_max_command_age_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeleopConfig {
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_teleop_deadband")]
    pub deadband: f64,
    #[serde(default = "default_slew_rate")]
    pub slew_rate_per_sec: f64,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            deadband: default_teleop_deadband(),
            slew_rate_per_sec: default_slew_rate(),
        }
    }
}

fn default_baudrate() -> u32 { 115_200 }
fn default_command_rate_hz() -> u32 { 50 }
fn default_max_command_age_ms() -> u64 { 250 }
fn default_pwm_frequency() -> u32 { 1000 }
fn default_pwm_deadband() -> f64 { 0.05 }
fn default_max_speed() -> f64 { 1.0 }
fn default_teleop_deadband() -> f64 { 0.05 }
fn default_slew_rate() -> f64 { 2.0 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.uart.baudrate, 115_200);
        assert_eq!(cfg.hardware_gateway.command_rate_hz, 50);
        assert_eq!(cfg.hardware_gateway.max_command_age_ms, 250);
        assert_eq!(cfg.control.pi_pwm.pwm_frequency, 1000);
        assert_eq!(cfg.control.pi_pwm.max_command_age_ms, 250);
        assert_eq!(cfg.control.pi_pwm.deadband, 0.05);
        assert_eq!(cfg.teleop.max_speed, 1.0);
        assert_eq!(cfg.teleop.deadband, 0.05);
        assert_eq!(cfg.teleop.slew_rate_per_sec, 2.0);
    }

    #[test]
    fn missing_backend_is_fatal() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn uart_backend_requires_port() {
        let mut cfg = Config::default();
        cfg.control.backend = "uart".into();
        assert!(cfg.validate().is_err());
        cfg.uart.port = "/dev/ttyUSB0".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pi_pwm_backend_requires_all_pins() {
        let mut cfg = Config::default();
        cfg.control.backend = "pi_pwm".into();
        assert!(cfg.validate().is_err());
        cfg.control.pi_pwm.left_in1 = Some(17);
        cfg.control.pi_pwm.left_in2 = Some(27);
        cfg.control.pi_pwm.left_ena = Some(18);
        cfg.control.pi_pwm.right_in3 = Some(22);
        cfg.control.pi_pwm.right_in4 = Some(23);
        cfg.control.pi_pwm.right_enb = Some(13);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_toml_table() {
        let raw = r#"
            [control]
            backend = "uart"

            [uart]
            port = "/dev/ttyAMA0"
            baudrate = 57600

            [teleop]
            max_speed = 0.8
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.control.backend, "uart");
        assert_eq!(cfg.uart.port, "/dev/ttyAMA0");
        assert_eq!(cfg.uart.baudrate, 57600);
        assert_eq!(cfg.teleop.max_speed, 0.8);
        // unset keys still default
        assert_eq!(cfg.teleop.deadband, 0.05);
    }
}
