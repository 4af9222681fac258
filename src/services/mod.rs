//! Domain services behind the websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `presence` owns the location-update pipeline and is the only module the
//! routes call. The rest are its collaborators: storage, spatial lookup,
//! the social graph, the visibility rule, per-observer diffing, and the push
//! side of the transport.

pub mod connection;
pub mod geo;
pub mod location;
pub mod presence;
pub mod proximity;
pub mod social;
pub mod spatial;
pub mod visibility;
