//! Outbox worker: turns queued message rows into sent emails, with retry,
//! claiming, and a manual-control HTTP surface.

pub mod config;
pub mod control;
pub mod delivery;
pub mod error;
pub mod poller;
pub mod resolver;
pub mod store;
pub mod transport;
