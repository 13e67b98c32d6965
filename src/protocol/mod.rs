//! KNXnet/IP protocol implementation.
//!
//! Core protocol structures and parsing logic for KNXnet/IP frames,
//! service bodies, and cEMI inspection.

pub mod cemi;
pub mod constants;
pub mod frame;
pub mod services;

pub use cemi::*;
pub use constants::*;
pub use frame::*;
pub use services::*;
