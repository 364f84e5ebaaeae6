//! Holdfast Server
//!
//! Runs the WebSocket server over a small seeded world: two bodies, a pair
//! of cuffs and a chair.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use holdfast::{
    GameServer, GridVec, ServerConfig, TICK_RATE, VERSION,
    game::collab::InventoryCollaborator,
    network::SharedSession,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    info!("Holdfast Server v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", config.tick_rate, TICK_RATE);
    info!("Default movement mode: {:?}", config.sim.default_mode);
    if let Some(frame) = config.sim.frame_override {
        info!("Frame override: {} degrees", frame.degrees());
    }

    let server = GameServer::new(config);
    seed_world(&server.session()).await?;

    tokio::select! {
        result = server.run() => result.context("Server failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            server.shutdown();
        }
    }

    Ok(())
}

/// Populate the world with something to join.
async fn seed_world(session: &SharedSession) -> anyhow::Result<()> {
    let mut session = session.lock().await;

    let (officer, officer_net) = session.spawn_networked()?;
    let (suspect, suspect_net) = session.spawn_networked()?;
    let (chair, chair_net) = session.spawn_networked()?;

    let world = &mut session.state_mut().world;
    world.add_body(officer, GridVec::new(0, 0));
    world.add_body(suspect, GridVec::new(1, 0));
    world.add_body(chair, GridVec::new(2, 0));

    let cuffs = world.spawn_item(true, GridVec::new(0, 0));
    let hand = world.active_hand(officer);
    world.transfer(cuffs, officer, hand);

    info!("Officer: {} (holding cuffs)", officer_net.to_uuid_string());
    info!("Suspect: {}", suspect_net.to_uuid_string());
    info!("Chair:   {}", chair_net.to_uuid_string());
    Ok(())
}
