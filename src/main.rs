use anyhow::Context;
use tracing::{error, info};

use webserv::config::Config;
use webserv::server::{Reactor, Shutdown, listen_for_signals};

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level())
        .init();

    info!(servers = cfg.servers.len(), max_clients = cfg.max_clients, "Starting webserv");

    let shutdown = Shutdown::new();
    listen_for_signals(shutdown.clone()).context("installing signal handlers")?;

    let mut reactor = Reactor::new(cfg, shutdown).context("creating event loop")?;
    let bound = reactor.listen_configured();
    if bound.is_empty() {
        error!("No listener could be bound");
    }

    reactor.run()?;
    Ok(())
}
