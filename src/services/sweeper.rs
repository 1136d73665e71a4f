//! Background reclamation of expired objects.
//!
//! The sweeper cycles `Idle -> Scanning -> Purging -> Idle` on a fixed
//! interval, with the first cycle running as soon as it starts. Each expired
//! object is purged on its own; one failure is logged and the cycle moves on.

use crate::services::{
    admission::AdmissionGate,
    object_store::{ObjectStore, StoreResult},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPhase {
    #[default]
    Idle,
    Scanning,
    Purging,
}

/// Published after every phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStatus {
    pub phase: SweepPhase,
    /// Completed cycles since start.
    pub cycles: u64,
    /// Objects removed by the most recent completed cycle.
    pub last_purged: usize,
}

pub struct Sweeper {
    store: ObjectStore,
    gate: Option<Arc<AdmissionGate>>,
    interval: Duration,
    status: watch::Sender<SweepStatus>,
}

impl Sweeper {
    pub fn new(store: ObjectStore, interval: Duration) -> Self {
        let (status, _) = watch::channel(SweepStatus::default());
        Self {
            store,
            gate: None,
            interval,
            status,
        }
    }

    /// Also prune the gate's failure table after every cycle.
    pub fn with_admission_gate(mut self, gate: Arc<AdmissionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SweepStatus> {
        self.status.subscribe()
    }

    fn set_phase(&self, phase: SweepPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    /// Run a single cycle to completion and return the number of objects
    /// purged.
    ///
    /// Only a failed scan aborts the cycle. Failures on individual objects
    /// are logged and skipped.
    pub async fn run_once(&self) -> StoreResult<usize> {
        self.set_phase(SweepPhase::Scanning);
        let expired = match self.store.expired().await {
            Ok(expired) => expired,
            Err(err) => {
                self.set_phase(SweepPhase::Idle);
                return Err(err);
            }
        };

        self.set_phase(SweepPhase::Purging);
        let mut purged = 0;
        for record in &expired {
            match self.store.purge(record).await {
                Ok(true) => purged += 1,
                Ok(false) => debug!(id = %record.id, "expired object already removed"),
                Err(err) => warn!(
                    id = %record.id,
                    error = %err,
                    "failed to purge expired object; will retry next cycle"
                ),
            }
        }

        if let Some(gate) = &self.gate {
            let pruned = gate.prune();
            if pruned > 0 {
                debug!(pruned, tracked = gate.tracked(), "pruned rate-limit entries");
            }
        }

        self.status.send_modify(|s| {
            s.phase = SweepPhase::Idle;
            s.cycles += 1;
            s.last_purged = purged;
        });
        if purged > 0 {
            info!(purged, "cleaned up expired file(s)");
        }
        Ok(purged)
    }

    /// Spawn the recurring loop. The first cycle runs immediately.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let status = self.subscribe();
        let interval = self.interval;

        let join = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "file cleanup job started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("stopping sweeper");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            error!(error = %err, "sweep cycle failed");
                        }
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            status,
            join,
        }
    }
}

/// Running sweeper. The loop exits once the handle is stopped or dropped.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<SweepStatus>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn status(&self) -> watch::Receiver<SweepStatus> {
        self.status.clone()
    }

    /// Signal shutdown and wait for the loop to exit. A cycle already in
    /// progress finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "sweeper task ended abnormally");
        }
    }
}
