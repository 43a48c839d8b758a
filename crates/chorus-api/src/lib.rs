//! The chorus node: HTTP surface, replication, filter gossip, transcode
//! workers, and fleet monitoring wired around the shared [`state::AppState`].

pub mod auth;
pub mod cuckoo;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod replicator;
pub mod routes;
pub mod state;
pub mod transcoder;
