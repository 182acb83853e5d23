//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p rollback_client -- [--addr 127.0.0.1:40000] [--name Player]
//!       [--tick-hz 30] [--lag-ms 0] [--config client.json] [--script-hold 15]
//!
//! The client joins the relay, runs the top-down sample and steers its entity
//! along a scripted square. `--script-hold 0` disables the script so the
//! entity only moves on console commands.
//!
//! Console commands:
//!   move <x> <y> - Steer with an explicit axis
//!   stop         - Release all keys
//!   resync       - Ask peers for their window
//!   new          - Start a fresh session for everyone
//!   status       - Show client status
//!   quit         - Exit client

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use rollback_client::client::GameClient;
use rollback_client::input::{parse_console, ClientCommand, ScriptedInput};
use rollback_shared::config::EngineConfig;
use rollback_shared::driver::IntervalScheduler;
use rollback_shared::topdown::TopDown;
use tokio::sync::mpsc;
use tracing::info;

struct Args {
    cfg: EngineConfig,
    script_hold: u32,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            EngineConfig::from_json_str(&text)?
        }
        None => EngineConfig::default(),
    };
    let mut script_hold = 15;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--addr", Some(v)) => cfg.server_addr = v.clone(),
            ("--name", Some(v)) => cfg.participant = v.clone(),
            ("--tick-hz", Some(v)) => cfg.tick_hz = v.parse().context("--tick-hz")?,
            ("--lag-ms", Some(v)) => cfg.simulated_lag_ms = v.parse().context("--lag-ms")?,
            ("--script-hold", Some(v)) => script_hold = v.parse().context("--script-hold")?,
            ("--config", Some(_)) => {}
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    cfg.validate()?;
    Ok(Args { cfg, script_hold })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, script_hold } = parse_args()?;
    info!(
        server = %cfg.server_addr,
        participant = %cfg.participant,
        tick_hz = cfg.tick_hz,
        lag_ms = cfg.simulated_lag_ms,
        "Starting client"
    );

    let mut client = GameClient::connect(&cfg, TopDown::new(cfg.move_speed))
        .await
        .context("connect")?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand<_>>(64);

    // Spawn stdin reader thread.
    let console_tx = cmd_tx.clone();
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
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_console(line) {
                Ok(cmd) => {
                    if console_tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => println!("{e}"),
            }
        }
    });

    if script_hold > 0 {
        let script_tx = cmd_tx.clone();
        let period = client.engine().driver().tick_duration();
        tokio::spawn(async move {
            let mut script = ScriptedInput::new(script_hold);
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Some(input) = script.next_change() {
                    if script_tx.send(ClientCommand::Input(input)).await.is_err() {
                        break;
                    }
                }
            }
        });
    }
    drop(cmd_tx);

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    client.observe_ticks(|state| {
        if state.tick.0 % 64 == 0 {
            info!(tick = %state.tick, entities = state.payload.entities.len(), "tick");
        }
    });

    let scheduler = IntervalScheduler::new(client.engine().driver().tick_duration());
    client.run(scheduler, cmd_rx).await?;
    println!("Disconnected from relay.");
    Ok(())
}
