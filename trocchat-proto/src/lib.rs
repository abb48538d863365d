//! Shared wire contract for the Troc messaging core.

pub mod codec;
pub mod event;
pub mod model;
