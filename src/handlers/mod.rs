//! HTTP handlers. Each one is a thin adapter over the core services.

pub mod client_addr;
pub mod health_handlers;
pub mod share_handlers;
