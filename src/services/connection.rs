//! Connection registry: rider id to live push channels.
//!
//! DESIGN
//! ======
//! A rider may hold several connections at once (phone and watch). Every
//! push fans out to all of them. Sends use `try_send`: a full or closed
//! channel drops the frame and the pipeline moves on. Closed channels are
//! pruned on the next send.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use crate::frame::Frame;

/// Identifies one connection of a rider.
pub type ConnectionId = Uuid;

/// Push side of the transport, as seen by the presence pipeline.
pub trait ConnectionRegistry: Send + Sync {
    fn is_connected(&self, rider_id: Uuid) -> bool;

    /// Best-effort delivery to every channel of `rider_id`. Returns whether
    /// at least one channel accepted the frame.
    fn send(&self, rider_id: Uuid, frame: &Frame) -> bool;
}

/// In-process registry of websocket channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<Uuid, Vec<(ConnectionId, mpsc::Sender<Frame>)>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel for `rider_id` and return its connection id.
    pub fn register(&self, rider_id: Uuid, tx: mpsc::Sender<Frame>) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        self.channels
            .entry(rider_id)
            .or_default()
            .push((connection_id, tx));
        connection_id
    }

    /// Remove one channel. Returns `true` when the rider has no channels
    /// left, i.e. the rider went offline.
    pub fn unregister(&self, rider_id: Uuid, connection_id: ConnectionId) -> bool {
        let Some(mut channels) = self.channels.get_mut(&rider_id) else {
            return true;
        };
        channels.retain(|(id, _)| *id != connection_id);
        let empty = channels.is_empty();
        drop(channels);

        if empty {
            self.channels.remove_if(&rider_id, |_, channels| channels.is_empty());
        }
        empty
    }

    #[must_use]
    pub fn connection_count(&self, rider_id: Uuid) -> usize {
        self.channels.get(&rider_id).map_or(0, |c| c.len())
    }

    fn prune(&self, rider_id: Uuid, closed: &[ConnectionId]) {
        if let Some(mut channels) = self.channels.get_mut(&rider_id) {
            channels.retain(|(id, _)| !closed.contains(id));
        }
        self.channels.remove_if(&rider_id, |_, channels| channels.is_empty());
    }
}

impl ConnectionRegistry for ChannelRegistry {
    fn is_connected(&self, rider_id: Uuid) -> bool {
        self.channels.get(&rider_id).is_some_and(|c| !c.is_empty())
    }

    fn send(&self, rider_id: Uuid, frame: &Frame) -> bool {
        let mut delivered = false;
        let mut closed = Vec::new();
        {
            let Some(channels) = self.channels.get(&rider_id) else {
                return false;
            };
            for (connection_id, tx) in channels.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => delivered = true,
                    Err(TrySendError::Full(_)) => {
                        debug!(%rider_id, %connection_id, syscall = %frame.syscall, "push dropped: channel full");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*connection_id),
                }
            }
        }
        if !closed.is_empty() {
            self.prune(rider_id, &closed);
        }
        delivered
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
