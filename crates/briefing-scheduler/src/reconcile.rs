use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    advance::advance,
    dispatch::DispatchFailure,
    error::{Result, SchedulerError},
    store::{lease_cutoff, SubscriptionStore},
    types::ReconcileReport,
};

/// Repair state left behind by a dispatch that never finished.
///
/// `stale` is the longest a live dispatch can take. Older `pending` records
/// are failed, and claims older than `stale` are either advanced (an attempt
/// was recorded under the claim) or released (nothing was attempted, so the
/// subscription stays due).
pub fn reconcile(
    store: &SubscriptionStore,
    stale: Duration,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let cutoff = lease_cutoff(now, stale)?;
    let mut report = ReconcileReport::default();

    let detail = DispatchFailure::Interrupted.to_string();
    for record in store.fail_stale_pending(cutoff, &detail, now)? {
        warn!(
            delivery_id = %record.id,
            subscription_id = %record.subscription_id,
            attempted_at = %record.attempted_at,
            "abandoned pending delivery marked failed"
        );
        report.failed_records += 1;
    }

    for (id, claim) in store.expired_claims(cutoff)? {
        if store.has_delivery_for_claim(&claim)? {
            match advance(store, &id, &claim, now) {
                Ok(_) => report.advanced += 1,
                // Someone else resolved it between the scan and now.
                Err(SchedulerError::ClaimLost { .. }) => {}
                Err(e) => return Err(e),
            }
        } else if store.release_claim(&id, &claim)? {
            info!(subscription_id = %id, "expired claim released");
            report.released += 1;
        }
    }

    Ok(report)
}
