//! Library crate for quiz-duel-back, exposing modules for binaries and integration tests.

/// Runtime configuration.
pub mod config;
/// Storage backends.
pub mod dao;
/// HTTP and socket payloads.
pub mod dto;
/// Service errors and their HTTP mapping.
pub mod error;
/// Axum routers.
pub mod routes;
/// Match operations.
pub mod services;
/// Shared state and domain types.
pub mod state;
