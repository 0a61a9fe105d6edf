use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `subscriptions` and `deliveries` tables (idempotent). Instants
/// are RFC 3339 UTC text with fixed precision, so `<=` on the column is a
/// chronological comparison and the due-set query can use the index.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subscriptions (
            id                  TEXT    NOT NULL PRIMARY KEY,
            recipient_email     TEXT    NOT NULL,
            recipient_name      TEXT    NOT NULL,
            report_kind         TEXT    NOT NULL,
            frequency           TEXT    NOT NULL
                CHECK (frequency IN ('daily', 'weekly', 'monthly')),
            preferred_time      TEXT    NOT NULL,   -- HH:MM local wall clock
            time_zone           TEXT    NOT NULL,   -- IANA identifier
            query_template      TEXT    NOT NULL DEFAULT '',
            focus_areas         TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            is_active           INTEGER NOT NULL DEFAULT 1,
            last_run_at         TEXT,
            next_run_at         TEXT,
            anchor_day          INTEGER,            -- monthly target day, local
            total_reports_sent  INTEGER NOT NULL DEFAULT 0,
            claim_token         TEXT,               -- set while a cycle owns the row
            claimed_at          TEXT,
            schedule_error      TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            UNIQUE (recipient_email, report_kind, frequency)
        ) STRICT;

        -- SELECT … WHERE is_active = 1 AND next_run_at <= ? ORDER BY next_run_at
        CREATE INDEX IF NOT EXISTS idx_subscriptions_due
            ON subscriptions (is_active, next_run_at);

        -- Append-only; subscription_id is a reference, not an owning FK.
        CREATE TABLE IF NOT EXISTS deliveries (
            id                  TEXT    NOT NULL PRIMARY KEY,
            subscription_id     TEXT    NOT NULL,
            claim_token         TEXT,
            recipient_email     TEXT    NOT NULL,
            report_kind         TEXT    NOT NULL,
            attempted_at        TEXT    NOT NULL,
            completed_at        TEXT,
            status              TEXT    NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'sent', 'failed')),
            subject             TEXT,
            summary             TEXT,
            error_detail        TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_deliveries_subscription
            ON deliveries (subscription_id, attempted_at);
        CREATE INDEX IF NOT EXISTS idx_deliveries_pending
            ON deliveries (status, attempted_at);
        CREATE INDEX IF NOT EXISTS idx_deliveries_claim
            ON deliveries (claim_token);
        ",
    )?;
    Ok(())
}
