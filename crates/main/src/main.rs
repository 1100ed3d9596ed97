/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Binary entrypoint: loads configuration, builds the
//! [`StationContext`], spawns the Receptionist and the monitor sink,
//! then accepts connections on all three transport ports. Which port a
//! socket arrived on is irrelevant past this point — [`connection::handle_connection`]
//! runs the same auto-detecting state machine regardless.

use std::sync::{atomic::AtomicBool, Arc};

use common::{Config, Identifier, NetworkKind, StationConfig};
use directory::MemoryBarrack;
use station::{context::StationContext, neighbor::LoggingNeighborForward};
use tokio::net::TcpListener;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

const DEFAULT_CONFIG_PATH: &str = "/etc/dim-station/config.toml";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let text = std::fs::read_to_string(&config_path).unwrap_or_default();
    let mut config = Config::parse(&text);
    for error in &config.build_errors {
        tracing::warn!(%error, "configuration build error");
    }

    let self_id = config
        .value("station.id")
        .and_then(|s| Identifier::parse(s, NetworkKind::Station))
        .unwrap_or_else(|| Identifier::new("station", "dim.chat", NetworkKind::Station));
    let neighbor_id = config
        .value("station.neighbor")
        .and_then(|s| Identifier::parse(s, NetworkKind::Station));
    let station_config = StationConfig::parse(&mut config);

    let barrack = Arc::new(MemoryBarrack::new());
    let neighbor = Arc::new(LoggingNeighborForward);
    let (ctx, mut monitor_rx) =
        StationContext::new(self_id, neighbor_id, station_config, barrack, neighbor);
    let ctx = Arc::new(ctx);

    tokio::spawn(async move {
        while let Some(event) = monitor_rx.recv().await {
            tracing::info!(?event, "monitor");
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    {
        let ctx = ctx.clone();
        let running = running.clone();
        tokio::spawn(async move {
            station::receptionist::run(&ctx, &running).await;
        });
    }

    let listeners = [
        ("websocket", ctx.config.websocket_bind.clone()),
        ("mars", ctx.config.mars_bind.clone()),
        ("ndjson", ctx.config.ndjson_bind.clone()),
    ];
    let mut tasks = Vec::new();
    for (name, bind) in listeners {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(%name, %bind, %err, "failed to bind listener");
                    return;
                }
            };
            tracing::info!(%name, %bind, "listening");
            loop {
                match listener.accept().await {
                    Ok((socket, addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            station::connection::handle_connection(ctx, socket, addr).await;
                        });
                    }
                    Err(err) => {
                        tracing::error!(%err, "accept failed");
                    }
                }
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}
