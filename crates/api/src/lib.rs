//! HTTP/WebSocket surface and task orchestration for remgo.
//!
//! The routing layer is deliberately thin: handlers validate shape and
//! delegate to the scheduler, supervisor, coordinator, and catalog
//! readers.

pub mod config;
pub mod engine;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;
