mod behavior; // proactive mobility state machine
mod blackboard;
mod bus;
mod config;
mod sim; // simulated robot and activity launcher

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use homeward_navigation::{HomeFinder, JsonFileStore, PositionManager};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use behavior::{LogFeedback, ProactiveMobility};
use blackboard::Blackboard;
use bus::{Signal, Topic};
use crate::config::Settings;
use sim::SimulatedRobot;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Homeward started.");
    if let Err(e) = run().await {
        error!("Homeward failed: {:?}", e);
        std::process::exit(1);
    }
}

/// Wire the simulated robot, the home finder and the behavior, then let the
/// world run for the configured duration.
async fn run() -> anyhow::Result<()> {
    let override_path = std::env::args().nth(1).map(PathBuf::from);
    let config = crate::config::load_config(override_path.as_deref()).context("loading configuration")?;
    let settings = Settings::from_config(&config);
    info!(preferences = ?settings.preferences, "Settings loaded");

    let (events_tx, events_rx) = mpsc::channel(64);
    let robot = SimulatedRobot::new(
        settings.simulation.clone(),
        &settings.finder.marker,
        events_tx,
    );

    let store = Arc::new(JsonFileStore::new(settings.position.record_path.clone()));
    let position = Arc::new(PositionManager::new(
        robot.clone(),
        store,
        settings.position.max_record_age(),
    ));
    let home = Arc::new(HomeFinder::new(
        robot.services(),
        position,
        settings.finder.clone(),
        settings.preferences.technology,
    ));

    let bb: Blackboard = Arc::default();
    let bus: Topic<Signal> = Topic::new(64);
    let machine = ProactiveMobility::new(
        robot.robot(home, Arc::new(LogFeedback::default())),
        settings.preferences.clone(),
        bb.clone(),
        bus.clone(),
    );
    machine.start();
    let behavior = tokio::spawn(machine.clone().run(events_rx));

    let duration = Duration::from_secs_f64(settings.simulation.duration_secs.max(0.0));
    robot.live(machine, bb, bus, duration).await?;
    behavior.abort();

    info!("Homeward finished.");
    Ok(())
}
