//! Endpoint pool: reconciliation, selection and relay supervision

pub mod cache;
pub mod manager;
pub mod relay;

pub use cache::{SelectionCache, SelectionKey};
pub use manager::ProxyManager;
pub use relay::{ProcessRelaySupervisor, RelaySupervisor};
