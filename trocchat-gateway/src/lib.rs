//! Troc messaging gateway library.
//!
//! Exposes the gateway server for use in tests and embedding. The gateway
//! accepts authenticated WebSocket connections, validates and persists
//! messages through the conversation store, relays events to the
//! recipient's live sockets, and serves the REST reconciliation routes.

pub mod auth;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod rest;
pub mod service;
pub mod store;
