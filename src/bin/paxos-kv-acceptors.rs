// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use paxos_kv::{logging, serve_acceptors, Config};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cfg = Config::from_env()?;
    let servers = serve_acceptors(&cfg).await?;
    info!("serving {} acceptors, ctrl-c to stop", servers.len());
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    drop(servers);
    Ok(())
}
