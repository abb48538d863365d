//! Client messaging library for the Troc marketplace.
//!
//! Wraps the gateway's WebSocket contract behind a typed API:
//! [`adapter::SocketAdapter`] owns the connection, the authenticate
//! handshake, and send/ack reconciliation; [`viewmodel::ChatViewModel`]
//! is a synchronous reducer that folds server events and REST snapshots
//! into render-ready conversation state.

pub mod adapter;
pub mod config;
pub mod viewmodel;
