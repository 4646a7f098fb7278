//! Dispatch triggers.
//!
//! Two sources feed the orchestrator: an inline trigger scheduled right after
//! intake, and a periodic sweep that reclaims stale leases and picks up due
//! records. Both go through the same [`ClaimGuard`], so a record is processed
//! by at most one pass in this process at any instant.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use sitegen_shared::{RecordId, Result, SiteArtifact, SiteGenError};

use crate::guard::ClaimGuard;
use crate::orchestrator::{Orchestrator, PassOutcome};

/// What a dispatch attempt did.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Ran(PassOutcome),
    /// Another trigger in this process holds the claim.
    AlreadyClaimed,
}

/// Result of one sweep tick.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Stale GENERATING records returned to PENDING.
    pub reclaimed: Vec<RecordId>,
    /// The one record this tick dispatched, if any.
    pub dispatched: Option<(RecordId, PassOutcome)>,
}

pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    guard: Arc<ClaimGuard>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            guard: Arc::new(ClaimGuard::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn guard(&self) -> &Arc<ClaimGuard> {
        &self.guard
    }

    /// Claim `id` and run one pass. The claim is released when this returns.
    pub async fn dispatch(&self, id: &RecordId) -> Result<DispatchOutcome> {
        let Some(_claim) = self.guard.claim(*id) else {
            debug!(record_id = %id, "already claimed, skipping");
            return Ok(DispatchOutcome::AlreadyClaimed);
        };
        let outcome = self.orchestrator.process(id).await?;
        Ok(DispatchOutcome::Ran(outcome))
    }

    /// Schedule one detached attempt for a freshly created record.
    pub fn schedule_inline(self: &Arc<Self>, id: RecordId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let delay = this.orchestrator.config().inline_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match this.dispatch(&id).await {
                Ok(DispatchOutcome::Ran(outcome)) => {
                    debug!(record_id = %id, ?outcome, "inline pass finished");
                }
                Ok(DispatchOutcome::AlreadyClaimed) => {}
                Err(e) => error!(record_id = %id, error = %e, "inline dispatch failed"),
            }
        })
    }

    /// One sweep tick: reclaim stale leases, then dispatch at most one due
    /// record that is not already claimed here.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let storage = self.orchestrator.storage();
        let config = self.orchestrator.config();

        let window = chrono::Duration::from_std(config.liveness_window)
            .map_err(|e| SiteGenError::config(format!("liveness window out of range: {e}")))?;
        let reclaimed = storage.reclaim_stale(Utc::now() - window).await?;
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), "reclaimed stale generating records");
        }

        let mut report = SweepReport {
            reclaimed,
            dispatched: None,
        };

        for id in storage.due_records(config.sweep_batch).await? {
            match self.dispatch(&id).await? {
                DispatchOutcome::AlreadyClaimed => continue,
                DispatchOutcome::Ran(outcome) => {
                    report.dispatched = Some((id, outcome));
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Run the sweep on a fixed interval until `shutdown` flips to `true` or
    /// its sender is dropped. Tick errors are logged and never end the loop.
    pub async fn run_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.orchestrator.config().sweep_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "sweep tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("sweep stopped");
    }

    /// Re-render under the claim. `Ok(None)` if a pass currently holds it.
    pub async fn rerender(&self, id: &RecordId) -> Result<Option<SiteArtifact>> {
        let Some(_claim) = self.guard.claim(*id) else {
            return Ok(None);
        };
        self.orchestrator.rerender(id).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::time::Duration;

    use sitegen_shared::RecordStatus;

    fn dispatcher(h: &Harness) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(Arc::new(h.orchestrator())))
    }

    #[tokio::test]
    async fn simultaneous_triggers_run_one_pass() {
        let mut h = Harness::new().await;
        h.synth = Arc::new(CountingSynthesizer::slow(Duration::from_millis(50)));
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);

        let (a, b) = tokio::join!(d.dispatch(&id), d.dispatch(&id));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(h.synth.calls(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, DispatchOutcome::AlreadyClaimed))
                .count(),
            1
        );
        assert_eq!(h.storage.count_principals().await.unwrap(), 1);
        assert_eq!(h.notifier.sent().len(), 1);
        assert!(d.guard().is_empty());
    }

    #[tokio::test]
    async fn inline_and_sweep_together_run_one_pass() {
        let mut h = Harness::new().await;
        h.synth = Arc::new(CountingSynthesizer::slow(Duration::from_millis(50)));
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);

        let inline = d.schedule_inline(id);
        let (joined, swept) = tokio::join!(inline, d.sweep_once());
        joined.unwrap();
        swept.unwrap();

        assert_eq!(h.synth.calls(), 1);
        let record = h.storage.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Generated);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn sweep_dispatches_at_most_one_record_per_tick() {
        let h = Harness::new().await;
        let first = h.insert("First Shop").await;
        let second = h.insert("Second Shop").await;
        let d = dispatcher(&h);

        let report = d.sweep_once().await.unwrap();
        let (picked, outcome) = report.dispatched.expect("one record dispatched");
        assert_eq!(picked, first, "oldest pending first");
        assert!(outcome.is_generated());

        let untouched = h.storage.get_record(&second).await.unwrap().unwrap();
        assert_eq!(untouched.status, RecordStatus::Pending);

        let report = d.sweep_once().await.unwrap();
        assert_eq!(report.dispatched.map(|(id, _)| id), Some(second));
        assert!(d.sweep_once().await.unwrap().dispatched.is_none());
    }

    #[tokio::test]
    async fn sweep_skips_records_claimed_in_process() {
        let h = Harness::new().await;
        let busy = h.insert("Busy Shop").await;
        let idle = h.insert("Idle Shop").await;
        let d = dispatcher(&h);

        let _held = d.guard().claim(busy).unwrap();
        let report = d.sweep_once().await.unwrap();
        assert_eq!(report.dispatched.map(|(id, _)| id), Some(idle));
        assert_eq!(h.synth.calls(), 1);
    }

    #[tokio::test]
    async fn sweep_reclaims_abandoned_generation() {
        let h = Harness::new().await;
        let id = h.insert("Harbor Bakery").await;
        let crashed_at = Utc::now() - chrono::Duration::hours(2);
        assert!(h.storage.begin_generation(&id, "dead-worker", crashed_at).await.unwrap());
        let d = dispatcher(&h);

        let report = d.sweep_once().await.unwrap();
        assert_eq!(report.reclaimed, vec![id]);
        let (picked, outcome) = report.dispatched.expect("reclaimed record dispatched");
        assert_eq!(picked, id);
        assert!(outcome.is_generated());

        let record = h.storage.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Generated);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn fresh_lease_is_not_reclaimed() {
        let h = Harness::new().await;
        let id = h.insert("Harbor Bakery").await;
        assert!(h.storage.begin_generation(&id, "live-worker", Utc::now()).await.unwrap());
        let d = dispatcher(&h);

        let report = d.sweep_once().await.unwrap();
        assert!(report.reclaimed.is_empty());
        assert!(report.dispatched.is_none());
    }

    #[tokio::test]
    async fn inline_trigger_generates_record() {
        let h = Harness::new().await;
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);

        d.schedule_inline(id).await.unwrap();
        let record = h.storage.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Generated);
    }

    #[tokio::test]
    async fn failed_pass_is_retried_by_the_sweep() {
        let mut h = Harness::new().await;
        h.synth = Arc::new(CountingSynthesizer::failing(1));
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);

        d.schedule_inline(id).await.unwrap();
        let record = h.storage.get_record(&id).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Pending);

        let report = d.sweep_once().await.unwrap();
        assert!(report.dispatched.unwrap().1.is_generated());
    }

    #[tokio::test]
    async fn run_sweep_stops_on_shutdown() {
        let h = Harness::new().await;
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);
        let (tx, rx) = watch::channel(false);

        let worker = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.run_sweep(rx).await })
        };

        let mut generated = false;
        for _ in 0..100 {
            let record = h.storage.get_record(&id).await.unwrap().unwrap();
            if record.status == RecordStatus::Generated {
                generated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(generated, "sweep should pick up the pending record");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("sweep loop exits")
            .unwrap();
    }

    #[tokio::test]
    async fn rerender_respects_the_claim() {
        let h = Harness::new().await;
        let id = h.insert("Harbor Bakery").await;
        let d = dispatcher(&h);
        assert!(matches!(
            d.dispatch(&id).await.unwrap(),
            DispatchOutcome::Ran(PassOutcome::Generated(_))
        ));

        {
            let _held = d.guard().claim(id).unwrap();
            assert!(d.rerender(&id).await.unwrap().is_none());
        }
        assert!(d.rerender(&id).await.unwrap().is_some());
    }
}
