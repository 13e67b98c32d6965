//! KNX addressing types.
//!
//! Group and individual addresses as they appear in cEMI link-layer
//! frames. The simulator decodes them for log output only; it never
//! routes on them.

mod group;
mod individual;

pub use group::GroupAddress;
pub use individual::IndividualAddress;
