mod command;
mod config;
mod connection;
mod engine;
mod hardware;
mod transport;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use config::ControllerConfig;
use connection::{log_forwarder, LinkConfig, LinkServer};
use engine::Engine;
use hardware::HardwareContext;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transport::TcpTransportListener;

#[derive(Parser, Debug)]
#[command(name = "rc-controller")]
#[command(about = "Runs scripts submitted by an operator console on the RC controller")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "RC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long, env = "RC_LISTEN")]
    listen: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let mut config = ControllerConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    info!("[MAIN] Controller starting: {}", config.device_id);
    info!("[MAIN]   listen: {}", config.listen_addr);

    // Engine log lines go to tracing and to every connected console
    let (log_tx, _) = broadcast::channel(256);
    let engine = Engine::new(config.engine.options(), log_forwarder(log_tx.clone()));
    engine.set_timeout(config.engine.timeout());
    engine.register_default_preamble(config.engine.preamble.clone());
    engine.register_denylist(config.engine.denylist.clone());
    engine.register_remap_rules(
        config
            .engine
            .remap
            .iter()
            .map(|rule| (rule.from.clone(), rule.to.clone())),
    );

    let hardware = HardwareContext::new();
    engine.register_module(hardware.script_module());

    // Status LED follows the run; outputs rest when it ends
    let hw = hardware.clone();
    engine.register_start_hook(move || {
        if let Some(led) = hw.led("LED1") {
            led.set_color(0, 255, 0);
        }
    });
    let hw = hardware.clone();
    engine.register_final_hook(move || hw.release());

    let _dispatcher = engine.spawn_dispatcher();
    info!("[MAIN] Execution engine started");

    let listener = TcpTransportListener::bind(&config.listen_addr).await?;
    let link = LinkServer::new(
        listener,
        LinkConfig {
            device_id: config.device_id.clone(),
            heartbeat_interval: config.heartbeat_interval(),
        },
        engine,
        log_tx,
    );

    tokio::select! {
        result = link.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("[MAIN] Shutting down");
            hardware.release();
            Ok(())
        }
    }
}
