//! Standalone relay binary.
//!
//! Usage:
//!   cargo run -p rollback_server -- [--addr 127.0.0.1:40000] [--config relay.json]
//!
//! Console commands:
//!   status         - List identified participants
//!   quit           - Shutdown relay

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use rollback_server::RelayServer;
use rollback_shared::config::EngineConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = EngineConfig::default();
    if let Some(path) = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone())
    {
        let text = std::fs::read_to_string(&path).with_context(|| format!("read {path}"))?;
        cfg = EngineConfig::from_json_str(&text).with_context(|| format!("parse {path}"))?;
    }
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, "Starting relay");

    let server = RelayServer::bind(&cfg).await.context("bind relay")?;
    let local = server.local_addr()?;
    let handle = server.handle();
    info!(%local, "Relay listening");

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Relay ready. Type 'status' for participants, 'quit' to exit.");
    println!();

    let mut relay = server.spawn();
    loop {
        tokio::select! {
            res = &mut relay => {
                return res.context("relay task")?;
            }
            Some(line) = console_rx.recv() => {
                match line.as_str() {
                    "status" => {
                        let ids = handle.participants().await?;
                        println!("Participants: {}", ids.len());
                        for id in ids {
                            println!("  {id}");
                        }
                    }
                    "quit" | "exit" => {
                        info!("Relay shutting down");
                        relay.abort();
                        return Ok(());
                    }
                    other => println!("Unknown command: {other}"),
                }
            }
        }
    }
}
