mod config;
mod db;
mod frame;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use crate::services::social::{FriendshipOracle, RiderDirectory, StaticSocialGraph};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port: u16 = config::env_parse("PORT", config::DEFAULT_PORT);
    let presence_config = config::PresenceConfig::from_env();

    // Social graph from Postgres when configured, otherwise an empty in-memory
    // graph where everyone is a stranger.
    let (oracle, directory): (Arc<dyn FriendshipOracle>, Arc<dyn RiderDirectory>) =
        match std::env::var("DATABASE_URL") {
            Ok(database_url) => {
                let pool = db::init_pool(&database_url)
                    .await
                    .expect("database init failed");
                tracing::info!("social graph: postgres");
                (
                    Arc::new(db::social::PgFriendshipOracle::new(pool.clone())),
                    Arc::new(db::social::PgRiderDirectory::new(pool)),
                )
            }
            Err(_) => {
                tracing::warn!("DATABASE_URL not set; social graph is in-memory and empty");
                let graph = Arc::new(StaticSocialGraph::new());
                (graph.clone(), graph)
            }
        };

    let state = state::AppState::new(presence_config, oracle, directory);

    // Spawn background stale-location sweep.
    let _eviction = services::presence::spawn_eviction_task(state.presence.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(
        %port,
        friend_radius_m = presence_config.friend_radius_m,
        stranger_radius_m = presence_config.stranger_radius_m,
        "rider-radar listening"
    );
    axum::serve(listener, app).await.expect("server failed");
}
