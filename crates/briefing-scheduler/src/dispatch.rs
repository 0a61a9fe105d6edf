use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use briefing_core::ClaimToken;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::{
    error::{GenerateError, Result, TransportError},
    pipeline::{ReportGenerator, Transport},
    store::SubscriptionStore,
    types::{DeliveryOutcome, DeliveryRecord, RecipientContext, ReportContent, Subscription},
};

/// Why a dispatch attempt ended in `failed`. The `Display` form is what lands
/// in the delivery record's `error_detail`.
#[derive(Debug, Clone)]
pub enum DispatchFailure {
    Generate(GenerateError),
    GenerateTimeout { after: Duration },
    Transport(TransportError),
    SendTimeout { after: Duration },
    /// The generator or transport panicked.
    Panicked { stage: &'static str, message: String },
    /// Found `pending` after the process that started it went away.
    Interrupted,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Generate(e) => write!(f, "generation: {e}"),
            DispatchFailure::GenerateTimeout { after } => {
                write!(f, "generation: timed out after {}s", after.as_secs())
            }
            DispatchFailure::Transport(e) => write!(f, "transport: {e}"),
            DispatchFailure::SendTimeout { after } => {
                write!(f, "transport: timed out after {}s", after.as_secs())
            }
            DispatchFailure::Panicked { stage, message } => {
                write!(f, "{stage}: panicked: {message}")
            }
            DispatchFailure::Interrupted => f.write_str(
                "recovery: dispatch interrupted before completion (process stopped or crashed)",
            ),
        }
    }
}

/// Runs one delivery attempt: pending record, generate, send, terminal record.
pub struct Dispatcher {
    store: Arc<SubscriptionStore>,
    generator: Arc<dyn ReportGenerator>,
    transport: Arc<dyn Transport>,
    generate_timeout: Duration,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<SubscriptionStore>,
        generator: Arc<dyn ReportGenerator>,
        transport: Arc<dyn Transport>,
        generate_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            transport,
            generate_timeout,
            send_timeout,
        }
    }

    /// Dispatch one claimed subscription.
    ///
    /// Generator and transport failures (including timeouts and panics) are
    /// encoded in the returned record. `Err` means the store itself failed; a
    /// record left `pending` in that case is failed later by reconciliation.
    #[instrument(skip_all, fields(subscription_id = %sub.id, report_kind = %sub.report_kind))]
    pub async fn dispatch(
        &self,
        sub: &Subscription,
        claim: &ClaimToken,
        attempted_at: DateTime<Utc>,
    ) -> Result<DeliveryRecord> {
        let pending = self.store.insert_pending(sub, claim, attempted_at)?;
        let outcome = self.attempt(sub).await;
        // Never earlier than the attempt, even when the caller supplies a clock.
        let completed_at = Utc::now().max(attempted_at);
        let record = self
            .store
            .complete_delivery(&pending.id, &outcome, completed_at)?;

        match &outcome {
            DeliveryOutcome::Sent { .. } => info!(
                delivery_id = %record.id,
                recipient = %sub.recipient_email,
                transport = self.transport.name(),
                "report delivered"
            ),
            DeliveryOutcome::Failed { detail, .. } => warn!(
                delivery_id = %record.id,
                recipient = %sub.recipient_email,
                "delivery failed: {detail}"
            ),
        }
        Ok(record)
    }

    async fn attempt(&self, sub: &Subscription) -> DeliveryOutcome {
        let recipient = RecipientContext::from(sub);

        let content = match self.generate(sub, &recipient).await {
            Ok(content) => content,
            Err(failure) => {
                return DeliveryOutcome::Failed {
                    subject: None,
                    summary: None,
                    detail: failure.to_string(),
                }
            }
        };

        match self.send(sub, &content).await {
            Ok(()) => DeliveryOutcome::Sent {
                subject: content.subject,
                summary: content.summary,
            },
            Err(failure) => DeliveryOutcome::Failed {
                subject: Some(content.subject),
                summary: Some(content.summary),
                detail: failure.to_string(),
            },
        }
    }

    async fn generate(
        &self,
        sub: &Subscription,
        recipient: &RecipientContext,
    ) -> std::result::Result<ReportContent, DispatchFailure> {
        let call = AssertUnwindSafe(self.generator.generate(sub.report_kind, recipient));
        match timeout(self.generate_timeout, call.catch_unwind()).await {
            Err(_) => Err(DispatchFailure::GenerateTimeout {
                after: self.generate_timeout,
            }),
            Ok(Err(panic)) => Err(DispatchFailure::Panicked {
                stage: "generation",
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(result)) => result.map_err(DispatchFailure::Generate),
        }
    }

    async fn send(
        &self,
        sub: &Subscription,
        content: &ReportContent,
    ) -> std::result::Result<(), DispatchFailure> {
        let call = AssertUnwindSafe(self.transport.send(
            &sub.recipient_email,
            &sub.recipient_name,
            content,
        ));
        match timeout(self.send_timeout, call.catch_unwind()).await {
            Err(_) => Err(DispatchFailure::SendTimeout {
                after: self.send_timeout,
            }),
            Ok(Err(panic)) => Err(DispatchFailure::Panicked {
                stage: "transport",
                message: panic_message(panic.as_ref()),
            }),
            Ok(Ok(result)) => result.map_err(DispatchFailure::Transport),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
