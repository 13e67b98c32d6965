//! # knx-gateway-sim
//!
//! A KNXnet/IP gateway simulator for testing tunneling clients without
//! physical hardware.
//!
//! The simulator answers the core KNXnet/IP services over a single UDP
//! socket: device discovery (SEARCH), tunnel lifecycle (CONNECT,
//! CONNECTIONSTATE, DISCONNECT) and the tunneling data path. Group value
//! writes sent through the tunnel are echoed back as bus indications, so a
//! client under test observes the same traffic a real installation would
//! produce for its own writes.
//!
//! ## Features
//!
//! - Wire-exact KNXnet/IP frame and HPAI codecs
//! - Per-channel session tracking with indication sequence counters
//! - cEMI application-layer inspection for group communication services
//! - Discovery responder with outbound-route address selection
//! - Embeddable blocking server with a spawnable test handle
//!
//! ## Example
//!
//! ```rust,no_run
//! use knx_gateway_sim::{GatewaySimulator, SimulatorConfig};
//!
//! # fn main() -> std::io::Result<()> {
//! // Spawn a simulator on loopback for a test run
//! let simulator = GatewaySimulator::bind(SimulatorConfig::loopback())?;
//! let handle = simulator.spawn();
//! let gateway_addr = handle.addr();
//! // ... point the client under test at gateway_addr ...
//! handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod net;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export commonly used types
#[doc(inline)]
pub use config::SimulatorConfig;
#[doc(inline)]
pub use engine::GatewayEngine;
#[doc(inline)]
pub use error::{GatewayError, Result};
#[doc(inline)]
pub use net::{IpEndpoint, Ipv4Addr};
#[doc(inline)]
pub use server::{GatewaySimulator, SimulatorHandle};
