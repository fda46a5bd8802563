//! HTTP API: configuration, routing, auth middleware and service wiring.

pub mod app;
pub mod config;
pub mod middleware;
