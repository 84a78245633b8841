//! HTTP control API for the WhatsApp relay.

pub mod error;
pub mod routes;
pub mod server;

pub use {
    error::ApiError,
    server::{AppState, build_router, run, serve},
};
