//! HTTP and WebSocket surface for the broadcast control plane.

pub mod api;
pub mod client;
pub mod event_bridge;
pub mod handlers;
pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
