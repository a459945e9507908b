use crate::store::StoreCore;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Outcome of one recycle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecycleReport {
    /// Dirty slices written to disk
    pub flushed: usize,
    /// Slices dropped from memory after running out of vitality
    pub evicted: usize,
    /// Failures encountered; affected slices stay in memory and are retried
    pub errors: Vec<String>,
}

impl RecycleReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecyclerHealth {
    pub running: bool,
    pub ticks: u64,
    pub flushed_slices: u64,
    pub evicted_slices: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RecyclerHealth {
    fn initial() -> Self {
        Self {
            running: true,
            ..Self::default()
        }
    }

    fn record(&mut self, report: &RecycleReport) {
        self.ticks += 1;
        self.flushed_slices += report.flushed as u64;
        self.evicted_slices += report.evicted as u64;
        self.last_tick_unix_ms = Some(unix_ms_now());
        if report.is_ok() {
            self.consecutive_failures = 0;
        } else {
            self.failures += report.errors.len() as u64;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_error = report.errors.last().cloned();
        }
    }
}

pub(crate) enum RecyclerCommand {
    RecycleNow {
        reply: oneshot::Sender<RecycleReport>,
    },
    Shutdown,
}

pub(crate) struct RecyclerHandle {
    pub(crate) command_tx: mpsc::Sender<RecyclerCommand>,
    pub(crate) health_rx: watch::Receiver<RecyclerHealth>,
    pub(crate) join: JoinHandle<()>,
}

pub(crate) fn spawn_recycler(core: Arc<StoreCore>, interval: Duration) -> RecyclerHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (health_tx, health_rx) = watch::channel(RecyclerHealth::initial());
    let join = tokio::spawn(recycle_loop(core, interval, command_rx, health_tx));
    RecyclerHandle {
        command_tx,
        health_rx,
        join,
    }
}

async fn recycle_loop(
    core: Arc<StoreCore>,
    interval: Duration,
    mut command_rx: mpsc::Receiver<RecyclerCommand>,
    health_tx: watch::Sender<RecyclerHealth>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = run_pass(&core, &health_tx).await;
                log::debug!(
                    "Recycled {}: flushed={} evicted={}",
                    core.root().display(),
                    report.flushed,
                    report.evicted
                );
            }
            command = command_rx.recv() => match command {
                Some(RecyclerCommand::RecycleNow { reply }) => {
                    let report = run_pass(&core, &health_tx).await;
                    let _ = reply.send(report);
                }
                Some(RecyclerCommand::Shutdown) | None => break,
            },
        }
    }

    if let Err(err) = core.flush_all().await {
        log::warn!(
            "Final flush of {} failed: {err}",
            core.root().display()
        );
        health_tx.send_modify(|h| {
            h.failures += 1;
            h.last_error = Some(err.to_string());
        });
    }
    health_tx.send_modify(|h| h.running = false);
    log::debug!("Recycler for {} stopped", core.root().display());
}

async fn run_pass(core: &StoreCore, health_tx: &watch::Sender<RecyclerHealth>) -> RecycleReport {
    let report = core.recycle().await;
    for err in &report.errors {
        log::warn!("Recycler error in {}: {err}", core.root().display());
    }
    health_tx.send_modify(|h| h.record(&report));
    report
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_tracks_consecutive_failures() {
        let mut health = RecyclerHealth::initial();
        let failed = RecycleReport {
            errors: vec!["disk full".to_string()],
            ..RecycleReport::default()
        };
        health.record(&failed);
        health.record(&failed);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("disk full"));

        health.record(&RecycleReport {
            flushed: 3,
            evicted: 1,
            errors: Vec::new(),
        });
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.ticks, 3);
        assert_eq!(health.flushed_slices, 3);
        assert_eq!(health.evicted_slices, 1);
        assert!(health.last_tick_unix_ms.is_some());
    }
}
