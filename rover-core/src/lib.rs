//! Library surface for the rover control plane binary.
//!
//! Split out from `main.rs` so integration tests under `tests/` can drive
//! the bus, shaper, and motor backends the same way the binary does,
//! without real serial or GPIO hardware.

pub mod bus;
pub mod config;
pub mod error;
pub mod motor;
pub mod shaper;
