use async_trait::async_trait;

use crate::{
    error::{GenerateError, TransportError},
    types::{RecipientContext, ReportContent, ReportKind},
};

/// Produces report content for one subscriber.
///
/// Implementations must be `Send + Sync`: the dispatcher shares one generator
/// across all concurrent dispatches of a cycle.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Run the report routine selected by `kind` for `recipient`.
    async fn generate(
        &self,
        kind: ReportKind,
        recipient: &RecipientContext,
    ) -> Result<ReportContent, GenerateError>;
}

/// Delivers rendered report content to a recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"smtp"`).
    fn name(&self) -> &str;

    async fn send(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        content: &ReportContent,
    ) -> Result<(), TransportError>;
}
