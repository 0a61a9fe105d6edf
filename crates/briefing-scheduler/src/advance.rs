use briefing_core::{ClaimToken, SubscriptionId};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    error::Result,
    store::{AdvanceOutcome, SubscriptionStore},
};

/// Commit the schedule step that follows a dispatch attempt.
///
/// Runs after both sent and failed deliveries: `last_run_at` becomes `now` and
/// `next_run_at` moves to the next natural occurrence after `now`. A schedule
/// that can no longer be computed deactivates the subscription with
/// `schedule_error` set.
pub fn advance(
    store: &SubscriptionStore,
    id: &SubscriptionId,
    claim: &ClaimToken,
    now: DateTime<Utc>,
) -> Result<AdvanceOutcome> {
    let outcome = store.advance_claimed(id, claim, now)?;
    match &outcome {
        AdvanceOutcome::Advanced(sub) => {
            if let Some(next) = sub.next_run_at {
                info!(subscription_id = %id, next_run_at = %next, "schedule advanced");
            }
        }
        AdvanceOutcome::Flagged(sub) => error!(
            subscription_id = %id,
            time_zone = %sub.time_zone,
            reason = sub.schedule_error.as_deref().unwrap_or_default(),
            "next run could not be computed; subscription deactivated"
        ),
    }
    Ok(outcome)
}
