mod clock;
mod controller;
mod lines;
mod runtime;
mod schedule;
mod session;
mod settings;
mod store;
mod watering;
mod web;

use anyhow::{Context, Result};
use std::{env, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use controller::Controller;
use lines::LineBoard;
use store::FsStorage;

/// Granularity of session expiry; the schedule check runs on its own,
/// coarser interval inside the controller.
const LOOP_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings ────────────────────────────────────────────────────
    let settings_path =
        env::var("SETTINGS_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let settings = settings::load_or_default(&settings_path)?;

    // ── Hardware + storage ──────────────────────────────────────────
    let lines = LineBoard::new(
        settings.upper_pin(),
        settings.lower_pin(),
        settings.lines.active_low,
    )
    .context("failed to initialise line board")?;

    let storage = FsStorage::new(
        &settings.storage.config_path,
        &settings.storage.audit_log_path,
    );
    let clock = SystemClock::new(settings.utc_offset()?);

    let controller = Controller::new(clock, storage, lines, settings.controller_options());

    // ── Control loop ────────────────────────────────────────────────
    let (handle, commands) = runtime::channel(32);
    let control = tokio::spawn(runtime::run(controller, commands, LOOP_TICK));

    info!("watering controller started");

    // ── Web server (returns on ctrl-c or bind failure) ──────────────
    let served = web::serve(handle).await;

    // Every handle is gone once the router is dropped, so the loop exits
    // and switches the lines off on either path.
    control.await.context("control loop panicked")?;
    info!("watering controller stopped");
    served
}
