//! TCP accept loop and the single engine task.
//!
//! The core has no lock at all. One task owns the [`Engine`] outright, and
//! connections send it parsed request lines over a channel, awaiting the
//! rendered reply before reading the next line — preserving per-connection
//! ordering without ever taking a lock on the store.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command;
use crate::config::SharedConfig;
use crate::connection::ClientState;
use crate::engine::Engine;

struct EngineRequest {
    line: String,
    reply_tx: oneshot::Sender<String>,
}

type EngineHandle = mpsc::Sender<EngineRequest>;

pub async fn run_server(config: SharedConfig) -> std::io::Result<()> {
    let (bind, port, databases, dump_path, snapshot_interval_secs, sample_interval_secs, sample_size) = {
        let cfg = config.read().await;
        (
            cfg.bind.clone(),
            cfg.port,
            cfg.databases,
            cfg.dump_path.clone(),
            cfg.snapshot_interval_secs,
            cfg.sample_interval_secs,
            cfg.sample_size,
        )
    };

    let mut engine = Engine::new(databases, dump_path.clone(), snapshot_interval_secs);
    if let Err(e) = engine.load_from_disk() {
        tracing::error!(error = %e, path = %dump_path, "fatal: corrupt snapshot at startup");
        return Err(std::io::Error::other(e.to_string()));
    }

    let (tx, rx) = mpsc::channel::<EngineRequest>(256);
    tokio::spawn(engine_task(engine, rx, sample_interval_secs, sample_size));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                debug!("new connection from {peer_addr}");
                let handle = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle).await {
                        debug!("connection error from {peer_addr}: {e}");
                    }
                    debug!("connection closed: {peer_addr}");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

/// Owns the `Engine` for the process's lifetime. Every request line is
/// processed to completion before the next is read off the channel or a
/// sampling tick fires, so periodic sampling never runs mid-command and
/// commands from a single connection complete in the order they arrived.
async fn engine_task(
    mut engine: Engine,
    mut rx: mpsc::Receiver<EngineRequest>,
    sample_interval_secs: u64,
    sample_size: usize,
) {
    let mut sample_tick = tokio::time::interval(Duration::from_secs(sample_interval_secs.max(1)));
    sample_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            Some(req) = rx.recv() => {
                let tokens = command::parse_line(&req.line);
                let reply = command::dispatch(&mut engine, &tokens);
                let _ = req.reply_tx.send(reply.render());
            }
            _ = sample_tick.tick() => {
                engine.run_periodic_sampling(sample_size);
            }
            else => break,
        }
    }
}

async fn handle_connection(stream: TcpStream, handle: EngineHandle) -> std::io::Result<()> {
    let client = ClientState::new();
    debug!(client_id = client.id, "client attached");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle
            .send(EngineRequest {
                line: line.to_string(),
                reply_tx,
            })
            .await
            .is_err()
        {
            warn!("engine task gone, closing connection");
            break;
        }
        let Ok(rendered) = reply_rx.await else {
            break;
        };
        writer.write_all(rendered.as_bytes()).await?;
    }
    Ok(())
}
