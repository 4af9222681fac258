//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! wires one `PresenceCoordinator` to the in-process channel registry, so
//! websocket connections register here and the pipeline pushes through the
//! same registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::frame::Frame;
use crate::services::connection::{ChannelRegistry, ConnectionId};
use crate::services::location::LocationStore;
use crate::services::presence::PresenceCoordinator;
use crate::services::social::{FriendshipOracle, RiderDirectory};
use crate::services::spatial::ScanIndex;

/// Shared application state. Clone is required by Axum; all fields are Arc.
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ChannelRegistry>,
    pub presence: Arc<PresenceCoordinator>,
}

impl AppState {
    #[must_use]
    pub fn new(config: PresenceConfig, oracle: Arc<dyn FriendshipOracle>, directory: Arc<dyn RiderDirectory>) -> Self {
        let store = Arc::new(LocationStore::new());
        let index = Arc::new(ScanIndex::new(store.clone()));
        let connections = Arc::new(ChannelRegistry::new());
        let presence = Arc::new(PresenceCoordinator::new(
            config,
            store,
            index,
            oracle,
            directory,
            connections.clone(),
        ));
        Self { connections, presence }
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        self.presence.config()
    }

    /// Attach a push channel for `rider_id`.
    pub fn connect(&self, rider_id: Uuid, tx: mpsc::Sender<Frame>) -> ConnectionId {
        self.connections.register(rider_id, tx)
    }

    /// Detach one channel. When it was the rider's last, the rider stops
    /// observing: its snapshot is discarded. Its location stays until stale.
    pub fn disconnect(&self, rider_id: Uuid, connection_id: ConnectionId) {
        if self.connections.unregister(rider_id, connection_id) {
            self.presence.observer_disconnected(rider_id);
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
