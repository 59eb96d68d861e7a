//! HTTP transport over the proxy manager

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
