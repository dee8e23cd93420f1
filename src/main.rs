//! Application entry point — voicelink.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the WebSocket transport from config.
//! 5. Spawn the session controller on the tokio runtime.
//! 6. Run the stdin toggle loop — Enter starts/stops the voice session,
//!    `q` quits.  Closing the command channel tears down any running
//!    session before the process exits.

use std::io::{self, BufRead};
use std::sync::Arc;

use tokio::sync::mpsc;
use voicelink::{
    audio::CpalBackend,
    config::AppConfig,
    session::{new_shared_state, SessionCommand, SessionController},
    transport::LiveApiTransport,
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voicelink starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    if config.api.api_key.is_none() {
        log::warn!("no api_key configured — the endpoint may reject the connection");
    }

    // 3. Tokio runtime (2 worker threads — transport reader + writer)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // 4. Transport + shared state
    let state = new_shared_state();
    let transport = Arc::new(LiveApiTransport::from_config(&config.api));

    // 5. Session controller
    let controller = SessionController::new(
        Arc::clone(&state),
        transport,
        Arc::new(CpalBackend),
        config.live_config(),
    );
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(16);
    let controller_task = rt.spawn(controller.run(command_rx));

    // 6. stdin toggle loop
    println!("voicelink — press Enter to toggle the voice session, q + Enter to quit");

    for line in io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "q" | "quit" => break,
            "" => {
                let running = state.lock().unwrap().session.is_running();
                let cmd = if running {
                    println!("stopping session…");
                    SessionCommand::Stop
                } else {
                    println!("starting session… (speak once connected)");
                    SessionCommand::Start
                };
                if rt.block_on(command_tx.send(cmd)).is_err() {
                    break;
                }
            }
            other => {
                println!("unrecognised input {other:?} — Enter toggles, q quits");
            }
        }
    }

    // Closing the command channel makes the controller tear down and return.
    drop(command_tx);
    let _ = rt.block_on(controller_task);

    if let Some(error) = state.lock().unwrap().last_error.clone() {
        log::warn!("last session ended with an error: {error}");
    }

    log::info!("voicelink shut down");
    Ok(())
}
