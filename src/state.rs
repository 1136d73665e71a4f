//! Shared state handed to every handler.

use crate::services::{admission::AdmissionGate, object_store::ObjectStore, sweeper::SweepStatus};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    pub gate: Arc<AdmissionGate>,
    /// Base for share links; derived from request headers when unset.
    pub public_url: Option<String>,
    pub trust_proxy_headers: bool,
    pub sweep_status: watch::Receiver<SweepStatus>,
}
