//! ProxyChain - upstream proxy inventory with stable local endpoints
//!
//! ## Features
//!
//! - Normalizes structured proxy lists, forward directives and subscriptions
//!   into de-duplicated backend nodes with inferred countries
//! - Persistent, collision-free local port pairs per node
//! - One relay-backed endpoint per node and enabled protocol
//! - Least-recently-used or randomized selection with a TTL cache
//! - Periodic background refresh and a small HTTP API

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod pool;
pub mod repository;
pub mod services;

pub use config::Config;
pub use error::{ChainError, Result};
pub use pool::ProxyManager;
