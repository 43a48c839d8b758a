//! Core domain types for the chorus content network: configuration, errors,
//! job/blob models, content identifiers, rendezvous placement, and wallet
//! signatures. Everything here is runtime-agnostic; I/O lives in the other
//! crates.

pub mod cid;
pub mod config;
pub mod error;
pub mod models;
pub mod rendezvous;
pub mod signature;

pub use config::{ChorusConfig, Env, Peer};
pub use error::AppError;
