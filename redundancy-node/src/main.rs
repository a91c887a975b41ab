//! Redundancy node entry point.
//!
//! Wires a `UdpTransport`, `MembershipTable` and `Coordinator` together and
//! runs the heartbeat publisher and coordinator loop side by side until
//! Ctrl-C, at which point every task is told to shut down and the process
//! exits 0 — or non-zero if the coordinator state machine landed in `Error`.

use std::sync::Arc;

use clap::Parser;
use redundancy_core::config::NodeConfig;
use redundancy_core::coordinator::{run_coordinator_loop, Coordinator};
use redundancy_core::membership::MembershipTable;
use redundancy_core::transport::{Transport, UdpTransport};
use redundancy_core::types::CoordinatorState;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// The fixed tracked-signal names this build recognizes, same seven colors
/// and default (`YELLOW`) as original_source's `tracker.cxx`/`gimbal.hpp`.
const KNOWN_SIGNALS: [&str; 7] = ["RED", "ORANGE", "YELLOW", "GREEN", "CYAN", "BLUE", "PURPLE"];
const DEFAULT_SIGNAL: &str = "YELLOW";

/// Resolve a requested signal name against `KNOWN_SIGNALS`, case-insensitively,
/// falling back to `DEFAULT_SIGNAL` with a warning on an unrecognized name.
fn resolve_signal_name(requested: &str) -> String {
    let upper = requested.to_uppercase();
    if KNOWN_SIGNALS.contains(&upper.as_str()) {
        upper
    } else {
        warn!("unrecognized tracked-signal name \"{requested}\", defaulting to {DEFAULT_SIGNAL}");
        DEFAULT_SIGNAL.to_string()
    }
}

/// Triple-redundant tracker coordination node.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracked-signal name (RED, ORANGE, YELLOW, GREEN, CYAN, BLUE, PURPLE),
    /// used for mDNS announcement. Unrecognized names fall back to YELLOW.
    #[arg(long, default_value = DEFAULT_SIGNAL)]
    signal: String,

    /// UDP port for heartbeat, vote and servo_control traffic.
    #[arg(long, default_value_t = redundancy_core::transport::DEFAULT_PORT)]
    port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable mDNS discovery (useful in environments without multicast).
    #[arg(long)]
    no_mdns: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("unrecognized log level \"{other}\", defaulting to info");
            Level::INFO
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let signal_name = resolve_signal_name(&args.signal);
    let config = NodeConfig::default()
        .with_signal_name(signal_name)
        .with_port(args.port);
    let config = if args.no_mdns { config.without_mdns() } else { config };

    info!("redundancy node \"{}\" starting on port {}", config.signal_name, config.transport.port);

    let (transport, inbound) =
        UdpTransport::bind(config.transport.port, config.heartbeat.missed_after).await?;
    let transport = Arc::new(transport);
    let own_id = transport.own_id();
    info!("bound transport, own_id={:?}", own_id);

    if config.transport.use_mdns {
        transport.announce_and_browse(&config.signal_name)?;
    }

    let mut table = MembershipTable::new(own_id);
    let initialize_ticks = (config.coordinator.initialize_window.as_secs_f64()
        / config.coordinator.tick_period.as_secs_f64())
    .round()
    .max(1.0) as u32;
    table.set_initialize_ticks(initialize_ticks);
    let table = Arc::new(Mutex::new(table));
    let coordinator = Coordinator::new(table.clone(), transport.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_handle = tokio::spawn(redundancy_core::heartbeat::run_heartbeat_publisher(
        transport.heartbeat_tx(),
        own_id,
        config.heartbeat.period,
        shutdown_rx.clone(),
    ));

    let coordinator_handle = tokio::spawn(run_coordinator_loop(
        coordinator,
        config.coordinator.tick_period,
        transport.vote_tx(),
        inbound.heartbeats,
        inbound.ballots,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    transport.shutdown();

    let _ = heartbeat_handle.await;
    let final_state = coordinator_handle.await.unwrap_or(CoordinatorState::Error);

    let final_role = table.lock().await.own_slot().role;
    info!("exiting, last held role: {:?}", final_role);

    if final_state == CoordinatorState::Error {
        error!("coordinator state machine landed in Error");
        std::process::exit(1);
    }

    Ok(())
}
