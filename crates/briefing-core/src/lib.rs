//! `briefing-core`: configuration, error type and identifiers shared by the
//! scheduler, the delivery adapters and the `briefingd` binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::BriefingConfig;
pub use error::{BriefingError, Result};
pub use types::{ClaimToken, DeliveryId, SubscriptionId};
