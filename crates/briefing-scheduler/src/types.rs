use briefing_core::{DeliveryId, SubscriptionId};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// How often a subscription produces a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = ScheduleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(ScheduleError::InvalidFrequency(s.to_string())),
        }
    }
}

/// Selects which external report-generation routine runs for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    CompetitiveIntelligence,
    ProductIntelligence,
    MarketTrends,
    #[default]
    Comprehensive,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::CompetitiveIntelligence => "competitive_intelligence",
            ReportKind::ProductIntelligence => "product_intelligence",
            ReportKind::MarketTrends => "market_trends",
            ReportKind::Comprehensive => "comprehensive",
        }
    }

    /// Human-readable label used in subjects and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::CompetitiveIntelligence => "Competitive Intelligence",
            ReportKind::ProductIntelligence => "Product Intelligence",
            ReportKind::MarketTrends => "Market Trends",
            ReportKind::Comprehensive => "Comprehensive Research",
        }
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportKind {
    type Err = ScheduleError;

    /// Accepts the canonical names plus the legacy `*_agent` spellings.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "competitive_intelligence" | "competitive_intelligence_agent" => {
                Ok(ReportKind::CompetitiveIntelligence)
            }
            "product_intelligence" | "product_intelligence_agent" => {
                Ok(ReportKind::ProductIntelligence)
            }
            "market_trends" | "market_trends_agent" => Ok(ReportKind::MarketTrends),
            "comprehensive" | "comprehensive_research" => Ok(ReportKind::Comprehensive),
            _ => Err(ScheduleError::InvalidReportKind(s.to_string())),
        }
    }
}

/// A persisted subscriber schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub recipient_email: String,
    pub recipient_name: String,
    pub report_kind: ReportKind,
    pub frequency: Frequency,
    /// Wall-clock delivery time, interpreted in `time_zone`.
    pub preferred_time: NaiveTime,
    /// IANA zone identifier. Kept as text so a bad value can be flagged
    /// rather than rejected at load time.
    pub time_zone: String,
    /// Template query handed to the report generator.
    pub query_template: String,
    pub focus_areas: Vec<String>,
    pub is_active: bool,
    /// Start of the most recent dispatch attempt.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Always `Some` while `is_active`.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Local day of month monthly deliveries aim for, taken from the first
    /// scheduled occurrence. Shorter months clamp without moving it.
    pub anchor_day: Option<u32>,
    /// Confirmed successful deliveries only.
    pub total_reports_sent: u64,
    /// Set when the schedule could not be computed; the subscription is
    /// deactivated until an administrator fixes it.
    pub schedule_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`SubscriptionStore::create`](crate::store::SubscriptionStore::create).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub recipient_email: String,
    pub recipient_name: String,
    #[serde(default)]
    pub report_kind: ReportKind,
    pub frequency: Frequency,
    pub preferred_time: NaiveTime,
    pub time_zone: String,
    #[serde(default)]
    pub query_template: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// A user edit to the schedule-relevant fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleChange {
    pub frequency: Option<Frequency>,
    pub preferred_time: Option<NaiveTime>,
    pub time_zone: Option<String>,
}

/// Lifecycle of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created right before the transport is invoked.
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Append-only audit entry for one dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    /// Reference only; the record outlives schedule edits.
    pub subscription_id: SubscriptionId,
    pub recipient_email: String,
    pub report_kind: ReportKind,
    pub attempted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    pub subject: Option<String>,
    pub summary: Option<String>,
    /// Present only when `status` is `Failed`.
    pub error_detail: Option<String>,
}

/// Terminal result written onto a pending [`DeliveryRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        subject: String,
        summary: String,
    },
    Failed {
        subject: Option<String>,
        summary: Option<String>,
        detail: String,
    },
}

impl DeliveryOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryOutcome::Sent { .. } => DeliveryStatus::Sent,
            DeliveryOutcome::Failed { .. } => DeliveryStatus::Failed,
        }
    }
}

/// What the report generator gets to know about the subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientContext {
    pub subscription_id: SubscriptionId,
    pub recipient_email: String,
    pub recipient_name: String,
    pub frequency: Frequency,
    pub query_template: String,
    pub focus_areas: Vec<String>,
}

impl From<&Subscription> for RecipientContext {
    fn from(sub: &Subscription) -> Self {
        Self {
            subscription_id: sub.id.clone(),
            recipient_email: sub.recipient_email.clone(),
            recipient_name: sub.recipient_name.clone(),
            frequency: sub.frequency,
            query_template: sub.query_template.clone(),
            focus_areas: sub.focus_areas.clone(),
        }
    }
}

/// Rendered report, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContent {
    pub subject: String,
    /// One-paragraph abstract kept on the delivery record.
    pub summary: String,
    pub text_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
}

/// Narrows a cycle to part of the due set.
#[derive(Debug, Clone, Default)]
pub struct DueFilter {
    /// Only subscriptions whose `time_zone` equals this identifier.
    pub time_zone: Option<String>,
}

impl DueFilter {
    pub fn time_zone(tz: impl Into<String>) -> Self {
        Self {
            time_zone: Some(tz.into()),
        }
    }
}

/// Counters produced by crash-recovery reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pending records older than the stale threshold, now `failed`.
    pub failed_records: usize,
    /// Expired claims whose attempt was recorded; schedule advanced.
    pub advanced: usize,
    /// Expired claims with no recorded attempt; released, still due.
    pub released: usize,
}

/// Summary of one driver cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub reconciled: ReconcileReport,
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    /// Claim lost to a concurrent cycle, or not started because of a stop signal.
    pub skipped: usize,
    /// Infrastructure failures isolated to a single subscription.
    pub errors: usize,
    /// Due rows that could not be read and were deactivated instead.
    pub flagged: usize,
}

/// A stored subscription row that no longer maps onto a [`Subscription`]
/// (for example a `preferred_time` of `9am` written by another tool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableSubscription {
    pub id: SubscriptionId,
    pub reason: String,
}

/// Observable state of the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Idle,
    RunningCycle,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert!(matches!(
            "hourly".parse::<Frequency>(),
            Err(ScheduleError::InvalidFrequency(_))
        ));
    }

    #[test]
    fn report_kind_accepts_legacy_agent_names() {
        assert_eq!(
            "market_trends_agent".parse::<ReportKind>().unwrap(),
            ReportKind::MarketTrends
        );
        assert_eq!(
            "comprehensive_research".parse::<ReportKind>().unwrap(),
            ReportKind::Comprehensive
        );
        assert_eq!(ReportKind::default(), ReportKind::Comprehensive);
    }

    #[test]
    fn report_content_omits_missing_html() {
        let content = ReportContent {
            subject: "s".into(),
            summary: "sum".into(),
            text_body: "body".into(),
            html_body: None,
        };
        let json = serde_json::to_string(&content).unwrap();
        assert!(!json.contains("html_body"));
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Sent.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert_eq!("failed".parse::<DeliveryStatus>(), Ok(DeliveryStatus::Failed));
    }
}
