//! `briefing-scheduler`: recurring report subscriptions with SQLite persistence.
//!
//! # Overview
//!
//! Subscriptions live in a SQLite `subscriptions` table; every attempt to
//! deliver a report is appended to `deliveries`. The [`engine::Scheduler`]
//! wakes on a fixed poll interval and runs one cycle:
//!
//! 1. [`reconcile`](reconcile::reconcile) repairs what a crashed cycle left behind.
//! 2. [`SubscriptionStore::select_due`] returns the due set, oldest first.
//! 3. Each subscription is claimed, handed to the [`Dispatcher`], then advanced
//!    by [`advance`](advance::advance) whether the delivery succeeded or not.
//!
//! Report generation and transport are external; they plug in through the
//! [`ReportGenerator`] and [`Transport`] traits.
//!
//! # Cadence
//!
//! | Frequency | Next run after a delivery                                 |
//! |-----------|-----------------------------------------------------------|
//! | `daily`   | Next local day at the preferred time                      |
//! | `weekly`  | Same weekday one week on, wall-clock time kept across DST |
//! | `monthly` | Same day-of-month, clamped to the month's last day        |

pub mod advance;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod types;

pub use dispatch::{DispatchFailure, Dispatcher};
pub use engine::Scheduler;
pub use error::{GenerateError, Result, ScheduleError, SchedulerError, TransportError};
pub use pipeline::{ReportGenerator, Transport};
pub use schedule::{compute_next_run, next_delivery_local};
pub use store::{AdvanceOutcome, SubscriptionStore};
pub use types::{
    CycleReport, DeliveryOutcome, DeliveryRecord, DeliveryStatus, DriverState, DueFilter,
    Frequency, NewSubscription, RecipientContext, ReconcileReport, ReportContent, ReportKind,
    ScheduleChange, Subscription, UnreadableSubscription,
};
