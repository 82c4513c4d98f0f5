//! The binary entry point for the skiff client.

use std::sync::Arc;

use clap::Parser;
use skiff_app::paths::{AppDirs, PathsError};
use skiff_app::session::{ClientSession, SessionError};
use skiff_app::singleplayer::EmbeddedServer;
use skiff_app::tick_loop::TickLoop;
use skiff_config::{CliArgs, Config, ConfigError, TransportKind};
use skiff_net::LoopbackChannel;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Paths(#[from] PathsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to start singleplayer server: {0}")]
    Server(#[source] std::io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(&args) {
        eprintln!("skiff: {e}");
        std::process::exit(1);
    }
}

fn run(args: &CliArgs) -> Result<(), AppError> {
    let dirs = match &args.config {
        Some(root) => AppDirs::with_root(root),
        None => AppDirs::resolve()?,
    };
    dirs.create()?;

    let mut config = Config::load_or_create(&dirs.config_dir)?;
    config.apply_cli_overrides(args);
    config.validate()?;

    skiff_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    tracing::info!(
        "Starting {:?} session to {}:{}",
        config.network.transport,
        config.network.server_address,
        config.network.server_port
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("skiff-net")
        .build()
        .map_err(AppError::Runtime)?;

    let net = &config.network;
    let (mut session, server) = match net.transport {
        TransportKind::Loopback => {
            let channel = LoopbackChannel::new();
            let server = EmbeddedServer::start(Arc::clone(&channel), net.tick_duration())
                .map_err(AppError::Server)?;
            (ClientSession::loopback(&channel), Some(server))
        }
        TransportKind::Tcp | TransportKind::Udp => {
            (ClientSession::remote(net, runtime.handle().clone()), None)
        }
    };
    session.connect(&net.server_address, net.server_port)?;

    let stats_every = u64::from(config.debug.stats_interval_secs) * u64::from(net.tick_rate);
    let mut tick_loop = TickLoop::new(net.tick_duration());
    loop {
        tick_loop.tick(|tick| {
            session.tick(tick);
            if stats_every > 0 && tick > 0 && tick % stats_every == 0 {
                session.log_stats();
            }
        });
        if session.is_finished() || args.ticks.is_some_and(|n| tick_loop.tick_count() >= n) {
            break;
        }
        tick_loop.wait_for_next_tick();
    }

    tracing::info!(
        "Session over after {} ticks: {} messages, {} packets received",
        tick_loop.tick_count(),
        session.messages_received(),
        session.packets_received()
    );
    session.shutdown();
    if let Some(server) = server {
        server.stop();
    }
    Ok(())
}
