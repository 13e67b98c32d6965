//! KNXnet/IP gateway simulator binary.
//!
//! Thin CLI shell around the library: parse arguments, initialise
//! logging, bind and run the blocking server loop. Stop with Ctrl+C.

use clap::Parser;

use knx_gateway_sim::config::SimulatorConfig;
use knx_gateway_sim::server::GatewaySimulator;

#[derive(Parser)]
#[command(
    name = "knx-gateway-sim",
    about = "KNXnet/IP gateway simulator for testing tunneling clients"
)]
struct Args {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = 3671)]
    port: u16,

    /// Verbose logging (per-request detail)
    #[arg(short, long)]
    verbose: bool,

    /// Do not join the discovery multicast group
    #[arg(long)]
    no_multicast: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = SimulatorConfig::new()
        .with_port(args.port)
        .with_multicast(!args.no_multicast);

    match GatewaySimulator::bind(config) {
        Ok(simulator) => simulator.run(),
        Err(e) => {
            log::error!("Failed to start simulator on port {}: {e}", args.port);
            std::process::exit(1);
        }
    }
}
