use std::{sync::Arc, time::Instant};

use briefing_core::config::SchedulerConfig;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    advance::advance,
    dispatch::Dispatcher,
    error::Result,
    pipeline::{ReportGenerator, Transport},
    reconcile::reconcile,
    store::SubscriptionStore,
    types::{CycleReport, DeliveryStatus, DriverState, DueFilter, ReconcileReport, Subscription},
};

/// What happened to one selected subscription within a cycle.
enum Processed {
    Sent,
    Failed,
    /// Claim not acquired: another cycle owns it or it is no longer due.
    Skipped,
}

/// Driver loop: reconcile, select the due set, then claim, dispatch and
/// advance each subscription with bounded concurrency.
pub struct Scheduler {
    store: Arc<SubscriptionStore>,
    dispatcher: Arc<Dispatcher>,
    settings: SchedulerConfig,
    state: watch::Sender<DriverState>,
}

impl Scheduler {
    pub fn new(
        store: Arc<SubscriptionStore>,
        generator: Arc<dyn ReportGenerator>,
        transport: Arc<dyn Transport>,
        settings: SchedulerConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            generator,
            transport,
            settings.generate_timeout(),
            settings.send_timeout(),
        );
        let (state, _) = watch::channel(DriverState::Idle);
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            settings,
            state,
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Observe state transitions (`idle → running_cycle → idle … stopped`).
    pub fn watch_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Crash-recovery pass; also run at the start of every cycle.
    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        reconcile(&self.store, self.settings.stale_dispatch(), now)
    }

    /// One cycle at the current time, for external cron-style invocation.
    pub async fn run_once(&self, filter: &DueFilter) -> Result<CycleReport> {
        let (_stop, never) = watch::channel(false);
        self.run_cycle(Utc::now(), filter, &never).await
    }

    /// Run one full cycle as of `now`.
    ///
    /// Once `shutdown` reads `true` no further dispatch is started; dispatches
    /// already spawned run to completion before this returns. `Err` means the
    /// store was unusable for the whole cycle.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        filter: &DueFilter,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport> {
        self.state.send_replace(DriverState::RunningCycle);
        let result = self.cycle(now, filter, shutdown).await;
        self.state.send_replace(DriverState::Idle);

        match &result {
            Ok(report) => info!(
                selected = report.selected,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                errors = report.errors,
                flagged = report.flagged,
                recovered = report.reconciled.failed_records,
                "cycle complete"
            ),
            Err(e) => error!("cycle aborted: {e}"),
        }
        result
    }

    /// Main loop. Runs a cycle every `poll_interval` until `shutdown`
    /// broadcasts `true` (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            max_concurrent = self.settings.max_concurrent_dispatches,
            "scheduler started"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Errors are logged by run_cycle; the next tick retries.
                    let _ = self.run_cycle(Utc::now(), &DueFilter::default(), &shutdown).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(DriverState::Stopped);
        info!("scheduler stopped");
    }

    async fn cycle(
        &self,
        now: DateTime<Utc>,
        filter: &DueFilter,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport {
            reconciled: self.reconcile(now)?,
            flagged: self.store.flag_unreadable_due(now)?.len(),
            ..Default::default()
        };

        let due = self.store.select_due(now, filter)?;
        report.selected = due.len();
        if due.is_empty() {
            debug!("nothing due");
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_dispatches.max(1)));
        let mut tasks = JoinSet::new();

        // Permits are taken in next_run_at order, so a single permit yields
        // strictly oldest-due-first sequential processing.
        for sub in due {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            if *shutdown.borrow() {
                report.skipped += 1;
                continue;
            }

            let store = Arc::clone(&self.store);
            let dispatcher = Arc::clone(&self.dispatcher);
            let lease = self.settings.stale_dispatch();
            let at = now
                + chrono::Duration::from_std(started.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
            tasks.spawn(async move {
                let _permit = permit;
                process(&store, &dispatcher, sub, at, lease).await
            });
        }

        if report.skipped > 0 {
            warn!(count = report.skipped, "stop requested; remaining dispatches not started");
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Processed::Sent)) => report.sent += 1,
                Ok(Ok(Processed::Failed)) => report.failed += 1,
                Ok(Ok(Processed::Skipped)) => report.skipped += 1,
                Ok(Err(e)) => {
                    error!("subscription processing failed: {e}");
                    report.errors += 1;
                }
                Err(e) => {
                    error!("dispatch task aborted: {e}");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Claim → dispatch → advance for one subscription.
async fn process(
    store: &SubscriptionStore,
    dispatcher: &Dispatcher,
    sub: Subscription,
    at: DateTime<Utc>,
    lease: std::time::Duration,
) -> Result<Processed> {
    let Some((sub, claim)) = store.claim(&sub.id, at, lease)? else {
        debug!(subscription_id = %sub.id, "skipped: claimed elsewhere or no longer due");
        return Ok(Processed::Skipped);
    };

    let record = dispatcher.dispatch(&sub, &claim, at).await?;
    advance(store, &sub.id, &claim, at)?;

    Ok(match record.status {
        DeliveryStatus::Sent => Processed::Sent,
        _ => Processed::Failed,
    })
}
