//! # rover-types
//!
//! Shared data model and wire protocol for the rover control plane.
//!
//! This crate has no async runtime dependency so it can be linked by the
//! core control binary, the on-bench MCU simulator, and (were it built)
//! the HTTP/WebSocket operator gateway that sits outside this workspace.
//!
//! ## Coordinate / units conventions
//!
//! - Normalized wheel speeds: `f64` in `[-1.0, 1.0]`.
//! - Monotonic timestamps (deadlines: staleness, slew, periodic send) live
//!   outside this crate as `std::time::Instant` — never serialized.
//! - Wall-clock timestamps surfaced to operators use `chrono::DateTime<Utc>`.

pub mod messages;
pub mod protocol;

pub use messages::*;
