use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use briefing_core::{ClaimToken, DeliveryId, SubscriptionId};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, error, info, instrument, warn};
use validator::ValidateEmail;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::{compute_following_run, compute_next_run, local_day_of_month, parse_time_of_day},
    types::{
        DeliveryOutcome, DeliveryRecord, DeliveryStatus, DueFilter, Frequency, NewSubscription,
        ReportKind, ScheduleChange, Subscription, UnreadableSubscription,
    },
};

const SUBSCRIPTION_COLUMNS: &str = "id, recipient_email, recipient_name, report_kind, frequency,
     preferred_time, time_zone, query_template, focus_areas, is_active,
     last_run_at, next_run_at, total_reports_sent, schedule_error, created_at, updated_at,
     anchor_day";

const DUE_CLAUSE: &str = "WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
       AND (?2 IS NULL OR time_zone = ?2)
     ORDER BY next_run_at ASC, id ASC";

const DELIVERY_COLUMNS: &str = "id, subscription_id, recipient_email, report_kind, attempted_at,
     completed_at, status, subject, summary, error_detail";

/// Result of advancing a claimed subscription.
#[derive(Debug, Clone)]
pub enum AdvanceOutcome {
    /// `last_run_at`/`next_run_at` updated and the claim released.
    Advanced(Subscription),
    /// The next run could not be computed; the subscription was deactivated
    /// and `schedule_error` set.
    Flagged(Subscription),
}

/// Durable subscription table plus the append-only delivery log.
///
/// Wraps a single SQLite connection in a `Mutex`; every method holds the lock
/// for one short statement sequence, never across an `.await`.
pub struct SubscriptionStore {
    db: Mutex<Connection>,
}

impl SubscriptionStore {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) a file database with WAL and a busy timeout so several
    /// processes can share it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().expect("subscription store mutex poisoned")
    }

    // --- subscription management -------------------------------------------

    /// Insert a subscription with `next_run_at` computed from `now`.
    #[instrument(skip(self, new), fields(email = %new.recipient_email, kind = %new.report_kind))]
    pub fn create(&self, new: NewSubscription, now: DateTime<Utc>) -> Result<Subscription> {
        let email = new.recipient_email.trim().to_string();
        validate_email(&email)?;
        let time_zone = new.time_zone.trim().to_string();
        let next = compute_next_run(new.frequency, new.preferred_time, &time_zone, now)?;
        let anchor_day = local_day_of_month(next, &time_zone)?;
        let focus_areas = serde_json::to_string(&new.focus_areas)
            .map_err(|e| SchedulerError::InvalidInput(e.to_string()))?;
        let id = SubscriptionId::new();
        let now_str = ts(now);

        let db = self.conn();
        let inserted = db.execute(
            "INSERT INTO subscriptions
             (id, recipient_email, recipient_name, report_kind, frequency, preferred_time,
              time_zone, query_template, focus_areas, is_active, last_run_at, next_run_at,
              total_reports_sent, created_at, updated_at, anchor_day)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,1,NULL,?10,0,?11,?11,?12)",
            params![
                id.as_str(),
                email,
                new.recipient_name.trim(),
                new.report_kind.as_str(),
                new.frequency.as_str(),
                new.preferred_time.format("%H:%M").to_string(),
                time_zone,
                new.query_template,
                focus_areas,
                ts(next),
                now_str,
                anchor_day,
            ],
        );
        match inserted {
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(SchedulerError::DuplicateSubscription {
                    email,
                    kind: new.report_kind.to_string(),
                    frequency: new.frequency.to_string(),
                });
            }
            other => {
                other?;
            }
        }

        info!(subscription_id = %id, next_run_at = %next, "subscription created");
        fetch_subscription(&db, &id)?.ok_or_else(|| not_found(&id))
    }

    pub fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        fetch_subscription(&self.conn(), id)
    }

    /// All readable subscriptions ordered by creation time. Rows that fail to
    /// map are reported by [`list_unreadable`](Self::list_unreadable).
    pub fn list(&self) -> Result<Vec<Subscription>> {
        let (subs, unreadable) = scan_subscriptions(
            &self.conn(),
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY created_at, id"),
            [],
        )?;
        if !unreadable.is_empty() {
            warn!(count = unreadable.len(), "unreadable subscription rows left out of listing");
        }
        Ok(subs)
    }

    pub fn list_unreadable(&self) -> Result<Vec<UnreadableSubscription>> {
        let (_, unreadable) = scan_subscriptions(
            &self.conn(),
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY created_at, id"),
            [],
        )?;
        Ok(unreadable)
    }

    /// Activate or deactivate. Activation recomputes `next_run_at` from `now`
    /// and clears any previous `schedule_error`.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub fn set_active(
        &self,
        id: &SubscriptionId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let db = self.conn();
        let sub = fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))?;

        if active {
            let next = compute_next_run(sub.frequency, sub.preferred_time, &sub.time_zone, now)?;
            let anchor_day = local_day_of_month(next, &sub.time_zone)?;
            db.execute(
                "UPDATE subscriptions
                 SET is_active = 1, next_run_at = ?1, anchor_day = ?2, schedule_error = NULL,
                     updated_at = ?3
                 WHERE id = ?4",
                params![ts(next), anchor_day, ts(now), id.as_str()],
            )?;
            info!(next_run_at = %next, "subscription activated");
        } else {
            db.execute(
                "UPDATE subscriptions SET is_active = 0, updated_at = ?1 WHERE id = ?2",
                params![ts(now), id.as_str()],
            )?;
            info!("subscription deactivated");
        }
        fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))
    }

    /// Apply a user edit to frequency / preferred time / time zone and
    /// recompute `next_run_at` from `now`.
    #[instrument(skip(self, change), fields(subscription_id = %id))]
    pub fn update_schedule(
        &self,
        id: &SubscriptionId,
        change: ScheduleChange,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let db = self.conn();
        let sub = fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))?;

        let frequency = change.frequency.unwrap_or(sub.frequency);
        let preferred_time = change.preferred_time.unwrap_or(sub.preferred_time);
        let time_zone = change
            .time_zone
            .map(|tz| tz.trim().to_string())
            .unwrap_or(sub.time_zone);
        let next = compute_next_run(frequency, preferred_time, &time_zone, now)?;
        let anchor_day = local_day_of_month(next, &time_zone)?;

        let updated = db.execute(
            "UPDATE subscriptions
             SET frequency = ?1, preferred_time = ?2, time_zone = ?3, next_run_at = ?4,
                 anchor_day = ?5, schedule_error = NULL, updated_at = ?6
             WHERE id = ?7",
            params![
                frequency.as_str(),
                preferred_time.format("%H:%M").to_string(),
                time_zone,
                ts(next),
                anchor_day,
                ts(now),
                id.as_str(),
            ],
        );
        match updated {
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(SchedulerError::DuplicateSubscription {
                    email: sub.recipient_email,
                    kind: sub.report_kind.to_string(),
                    frequency: frequency.to_string(),
                });
            }
            other => {
                other?;
            }
        }
        info!(%frequency, %time_zone, next_run_at = %next, "schedule updated");
        fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))
    }

    // --- due set / claim / advance ------------------------------------------

    /// Every active subscription with `next_run_at <= now`, oldest-due first.
    ///
    /// Read-only: never touches `next_run_at`. Due rows that cannot be read
    /// are logged and left for [`flag_unreadable_due`](Self::flag_unreadable_due).
    pub fn select_due(&self, now: DateTime<Utc>, filter: &DueFilter) -> Result<Vec<Subscription>> {
        let (due, unreadable) = scan_subscriptions(
            &self.conn(),
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions {DUE_CLAUSE}"),
            params![ts(now), filter.time_zone.as_deref()],
        )?;
        for row in &unreadable {
            error!(
                subscription_id = %row.id,
                reason = %row.reason,
                "due subscription is unreadable"
            );
        }
        Ok(due)
    }

    /// Deactivate every due row that no longer maps onto a [`Subscription`],
    /// recording the mapping error in `schedule_error`.
    #[instrument(skip(self))]
    pub fn flag_unreadable_due(&self, now: DateTime<Utc>) -> Result<Vec<UnreadableSubscription>> {
        let db = self.conn();
        let (_, unreadable) = scan_subscriptions(
            &db,
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions {DUE_CLAUSE}"),
            params![ts(now), Option::<&str>::None],
        )?;
        for row in &unreadable {
            db.execute(
                "UPDATE subscriptions
                 SET is_active = 0, next_run_at = NULL, schedule_error = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![row.reason, ts(now), row.id.as_str()],
            )?;
            error!(
                subscription_id = %row.id,
                reason = %row.reason,
                "unreadable subscription deactivated"
            );
        }
        Ok(unreadable)
    }

    /// Atomically take ownership of a due subscription for this cycle.
    ///
    /// Succeeds only if the row is still active, still due at `now`, and not
    /// held by a claim younger than `lease`. Returns the fresh row and the
    /// token that [`advance_claimed`](Self::advance_claimed) must present.
    #[instrument(skip(self), fields(subscription_id = %id))]
    pub fn claim(
        &self,
        id: &SubscriptionId,
        now: DateTime<Utc>,
        lease: std::time::Duration,
    ) -> Result<Option<(Subscription, ClaimToken)>> {
        let token = ClaimToken::new();
        let cutoff = lease_cutoff(now, lease)?;
        let db = self.conn();
        let n = db.execute(
            "UPDATE subscriptions SET claim_token = ?1, claimed_at = ?2
             WHERE id = ?3 AND is_active = 1
               AND next_run_at IS NOT NULL AND next_run_at <= ?2
               AND (claim_token IS NULL OR claimed_at IS NULL OR claimed_at < ?4)",
            params![token.as_str(), ts(now), id.as_str(), ts(cutoff)],
        )?;
        if n == 0 {
            debug!("claim not acquired");
            return Ok(None);
        }
        let sub = fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))?;
        Ok(Some((sub, token)))
    }

    /// Set `last_run_at = now`, compute the following run and release the claim.
    ///
    /// The occurrence being serviced (`next_run_at` at claim time) anchors
    /// weekly and monthly cadences. If a user edit already moved
    /// `next_run_at` past `now`, that value is kept.
    #[instrument(skip(self, claim), fields(subscription_id = %id))]
    pub fn advance_claimed(
        &self,
        id: &SubscriptionId,
        claim: &ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome> {
        let db = self.conn();
        let sub = fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))?;

        let next = match sub.next_run_at.filter(|next| *next > now) {
            Some(next) => Ok(next),
            None => compute_following_run(
                sub.frequency,
                sub.preferred_time,
                &sub.time_zone,
                sub.next_run_at,
                sub.anchor_day,
                now,
            ),
        };

        let (n, flagged) = match next {
            Ok(next) => {
                let n = db.execute(
                    "UPDATE subscriptions
                     SET last_run_at = ?1, next_run_at = ?2, claim_token = NULL,
                         claimed_at = NULL, updated_at = ?1
                     WHERE id = ?3 AND claim_token = ?4",
                    params![ts(now), ts(next), id.as_str(), claim.as_str()],
                )?;
                (n, false)
            }
            Err(e) => {
                let n = db.execute(
                    "UPDATE subscriptions
                     SET last_run_at = ?1, next_run_at = NULL, is_active = 0,
                         schedule_error = ?2, claim_token = NULL, claimed_at = NULL,
                         updated_at = ?1
                     WHERE id = ?3 AND claim_token = ?4",
                    params![ts(now), e.to_string(), id.as_str(), claim.as_str()],
                )?;
                (n, true)
            }
        };
        if n == 0 {
            return Err(SchedulerError::ClaimLost { id: id.to_string() });
        }

        let sub = fetch_subscription(&db, id)?.ok_or_else(|| not_found(id))?;
        Ok(if flagged {
            AdvanceOutcome::Flagged(sub)
        } else {
            AdvanceOutcome::Advanced(sub)
        })
    }

    /// Claims taken before `cutoff` that were never released.
    pub fn expired_claims(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<(SubscriptionId, ClaimToken)>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, claim_token FROM subscriptions
             WHERE claim_token IS NOT NULL AND (claimed_at IS NULL OR claimed_at < ?1)",
        )?;
        let rows = stmt.query_map([ts(cutoff)], |row| {
            Ok((
                SubscriptionId(row.get::<_, String>(0)?),
                ClaimToken(row.get::<_, String>(1)?),
            ))
        })?;
        Ok(collect_logged(rows))
    }

    /// Drop a claim without touching the schedule. Returns `false` if the
    /// claim had already been replaced or released.
    pub fn release_claim(&self, id: &SubscriptionId, claim: &ClaimToken) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE subscriptions SET claim_token = NULL, claimed_at = NULL
             WHERE id = ?1 AND claim_token = ?2",
            params![id.as_str(), claim.as_str()],
        )?;
        Ok(n > 0)
    }

    // --- delivery log ---------------------------------------------------------

    /// Append a `pending` record for an attempt starting at `attempted_at`.
    #[instrument(skip(self, sub, claim), fields(subscription_id = %sub.id))]
    pub fn insert_pending(
        &self,
        sub: &Subscription,
        claim: &ClaimToken,
        attempted_at: DateTime<Utc>,
    ) -> Result<DeliveryRecord> {
        let id = DeliveryId::new();
        let db = self.conn();
        db.execute(
            "INSERT INTO deliveries
             (id, subscription_id, claim_token, recipient_email, report_kind, attempted_at, status)
             VALUES (?1,?2,?3,?4,?5,?6,'pending')",
            params![
                id.as_str(),
                sub.id.as_str(),
                claim.as_str(),
                sub.recipient_email,
                sub.report_kind.as_str(),
                ts(attempted_at),
            ],
        )?;
        fetch_delivery(&db, &id)?.ok_or_else(|| SchedulerError::DeliveryNotFound {
            id: id.to_string(),
        })
    }

    /// Move a `pending` record to its terminal status. A `Sent` outcome also
    /// increments the subscription's `total_reports_sent` in the same
    /// transaction.
    #[instrument(skip(self, outcome), fields(delivery_id = %id, status = %outcome.status()))]
    pub fn complete_delivery(
        &self,
        id: &DeliveryId,
        outcome: &DeliveryOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<DeliveryRecord> {
        let (subject, summary, detail) = match outcome {
            DeliveryOutcome::Sent { subject, summary } => {
                (Some(subject.as_str()), Some(summary.as_str()), None)
            }
            DeliveryOutcome::Failed {
                subject,
                summary,
                detail,
            } => (subject.as_deref(), summary.as_deref(), Some(detail.as_str())),
        };

        let mut db = self.conn();
        let tx = db.transaction()?;
        let n = tx.execute(
            "UPDATE deliveries
             SET status = ?1, subject = ?2, summary = ?3, error_detail = ?4, completed_at = ?5
             WHERE id = ?6 AND status = 'pending'",
            params![
                outcome.status().as_str(),
                subject,
                summary,
                detail,
                ts(completed_at),
                id.as_str()
            ],
        )?;
        if n == 0 {
            return match fetch_delivery(&tx, id)? {
                Some(record) => Err(SchedulerError::InvalidInput(format!(
                    "delivery {id} is already {}",
                    record.status
                ))),
                None => Err(SchedulerError::DeliveryNotFound { id: id.to_string() }),
            };
        }
        if matches!(outcome, DeliveryOutcome::Sent { .. }) {
            tx.execute(
                "UPDATE subscriptions SET total_reports_sent = total_reports_sent + 1
                 WHERE id = (SELECT subscription_id FROM deliveries WHERE id = ?1)",
                [id.as_str()],
            )?;
        }
        let record = fetch_delivery(&tx, id)?.ok_or_else(|| SchedulerError::DeliveryNotFound {
            id: id.to_string(),
        })?;
        tx.commit()?;
        Ok(record)
    }

    /// Fail every `pending` record whose attempt started before `cutoff`.
    pub fn fail_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryRecord>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let ids: Vec<DeliveryId> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM deliveries WHERE status = 'pending' AND attempted_at < ?1",
            )?;
            let rows = stmt.query_map([ts(cutoff)], |row| row.get::<_, String>(0))?;
            let ids = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            ids.into_iter().map(DeliveryId).collect()
        };

        let mut failed = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE deliveries SET status = 'failed', error_detail = ?1, completed_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![detail, ts(now), id.as_str()],
            )?;
            if let Some(record) = fetch_delivery(&tx, id)? {
                failed.push(record);
            }
        }
        tx.commit()?;
        Ok(failed)
    }

    /// Whether any delivery attempt was recorded under `claim`.
    pub fn has_delivery_for_claim(&self, claim: &ClaimToken) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM deliveries WHERE claim_token = ?1",
            [claim.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_delivery(&self, id: &DeliveryId) -> Result<Option<DeliveryRecord>> {
        fetch_delivery(&self.conn(), id)
    }

    /// Most recent attempts first.
    pub fn deliveries_for(
        &self,
        subscription_id: &SubscriptionId,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries
             WHERE subscription_id = ?1
             ORDER BY attempted_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![subscription_id.as_str(), limit as i64],
            row_to_delivery,
        )?;
        Ok(collect_logged(rows))
    }
}

// --- helpers -------------------------------------------------------------------

/// Canonical stored form: RFC 3339, UTC `Z`, microseconds. Lexical order of
/// these strings equals chronological order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn lease_cutoff(
    now: DateTime<Utc>,
    lease: std::time::Duration,
) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .ok_or_else(|| SchedulerError::InvalidInput(format!("lease {lease:?} out of range")))
}

fn validate_email(email: &str) -> Result<()> {
    if email.validate_email() {
        Ok(())
    } else {
        Err(SchedulerError::InvalidInput(format!(
            "invalid recipient email `{email}`"
        )))
    }
}

fn not_found(id: &SubscriptionId) -> SchedulerError {
    SchedulerError::SubscriptionNotFound { id: id.to_string() }
}

fn fetch_subscription(db: &Connection, id: &SubscriptionId) -> Result<Option<Subscription>> {
    Ok(db
        .query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            [id.as_str()],
            row_to_subscription,
        )
        .optional()?)
}

fn fetch_delivery(db: &Connection, id: &DeliveryId) -> Result<Option<DeliveryRecord>> {
    Ok(db
        .query_row(
            &format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = ?1"),
            [id.as_str()],
            row_to_delivery,
        )
        .optional()?)
}

/// Run a subscription query, separating rows that map cleanly from rows that
/// do not. Only the `id` column of an unreadable row has to be valid.
fn scan_subscriptions(
    db: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<(Vec<Subscription>, Vec<UnreadableSubscription>)> {
    let mut stmt = db.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| {
        let id: String = row.get(0)?;
        Ok((id, row_to_subscription(row)))
    })?;

    let mut readable = Vec::new();
    let mut unreadable = Vec::new();
    for row in rows {
        match row? {
            (_, Ok(sub)) => readable.push(sub),
            (id, Err(e)) => unreadable.push(UnreadableSubscription {
                id: SubscriptionId(id),
                reason: unreadable_reason(&e),
            }),
        }
    }
    Ok((readable, unreadable))
}

fn unreadable_reason(e: &rusqlite::Error) -> String {
    match e {
        rusqlite::Error::FromSqlConversionFailure(_, _, inner) => inner.to_string(),
        other => other.to_string(),
    }
}

/// Keep readable rows; a malformed row is logged and skipped so one bad
/// record cannot stall every other subscriber.
fn collect_logged<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Vec<T> {
    rows.filter_map(|r| match r {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("skipping unreadable row: {e}");
            None
        }
    })
    .collect()
}

fn conversion(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn req_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => req_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Map a row selected with [`SUBSCRIPTION_COLUMNS`].
fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let kind: String = row.get(3)?;
    let frequency: String = row.get(4)?;
    let preferred_time: String = row.get(5)?;
    let focus_areas: String = row.get(8)?;

    Ok(Subscription {
        id: SubscriptionId(row.get(0)?),
        recipient_email: row.get(1)?,
        recipient_name: row.get(2)?,
        report_kind: kind.parse::<ReportKind>().map_err(|e| conversion(3, e))?,
        frequency: frequency.parse::<Frequency>().map_err(|e| conversion(4, e))?,
        preferred_time: parse_time_of_day(&preferred_time).map_err(|e| conversion(5, e))?,
        time_zone: row.get(6)?,
        query_template: row.get(7)?,
        focus_areas: serde_json::from_str::<Vec<String>>(&focus_areas)
            .map_err(|e| conversion(8, e))?,
        is_active: row.get(9)?,
        last_run_at: opt_ts(row, 10)?,
        next_run_at: opt_ts(row, 11)?,
        total_reports_sent: row.get::<_, i64>(12)?.max(0) as u64,
        schedule_error: row.get(13)?,
        created_at: req_ts(row, 14)?,
        updated_at: req_ts(row, 15)?,
        anchor_day: row
            .get::<_, Option<i64>>(16)?
            .and_then(|d| u32::try_from(d).ok()),
    })
}

/// Map a row selected with [`DELIVERY_COLUMNS`].
fn row_to_delivery(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let kind: String = row.get(3)?;
    let status: String = row.get(6)?;
    Ok(DeliveryRecord {
        id: DeliveryId(row.get(0)?),
        subscription_id: SubscriptionId(row.get(1)?),
        recipient_email: row.get(2)?,
        report_kind: kind.parse::<ReportKind>().map_err(|e| conversion(3, e))?,
        attempted_at: req_ts(row, 4)?,
        completed_at: opt_ts(row, 5)?,
        status: status
            .parse::<DeliveryStatus>()
            .map_err(|e| conversion(6, e))?,
        subject: row.get(7)?,
        summary: row.get(8)?,
        error_detail: row.get(9)?,
    })
}
