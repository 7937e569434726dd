//! Fatal error taxonomy.
//!
//! Only `start()`-time failures (config, hardware acquisition) live here and
//! propagate as `anyhow::Result` out of `main`. Everything else — transient
//! I/O, protocol decode errors, CRC mismatches — is handled locally at the
//! call site: logged, counted, and the owning task keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to open hardware link: {source}")]
    HardwareOpen {
        #[source]
        source: std::io::Error,
    },

    #[error("failed to claim GPIO resources: {source}")]
    GpioClaim {
        #[source]
        source: rppal::gpio::Error,
    },
}
