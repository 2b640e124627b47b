//! Library crate for lucky-draw-back, exposing modules for binaries and integration tests.

/// Runtime configuration.
pub mod config;
/// Persistence layer.
pub mod dao;
/// Request, response and event payloads.
pub mod dto;
/// Error types shared by services and routes.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Game logic and background tasks.
pub mod services;
/// Shared application state.
pub mod state;
