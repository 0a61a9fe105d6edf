//! Concrete adapters for the scheduler's external contracts.
//!
//! * [`SmtpTransport`] delivers rendered reports through an SMTP relay (lettre).
//! * [`HttpReportPipeline`] asks the report-generation service for content (reqwest).

pub mod error;
pub mod pipeline;
pub mod smtp;

pub use error::DeliveryError;
pub use pipeline::HttpReportPipeline;
pub use smtp::SmtpTransport;
