use async_trait::async_trait;
use briefing_core::config::SmtpConfig;
use briefing_scheduler::{ReportContent, Transport, TransportError};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::error::DeliveryError;

/// Port on which relays expect TLS from the first byte instead of STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Sends reports through an SMTP relay.
///
/// The underlying lettre transport is built once and reused for every
/// delivery; it does not connect until the first send.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject_prefix: Option<String>,
}

impl SmtpTransport {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let mut builder = if config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        }
        .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let address: Address = config.from_address.parse()?;
        Ok(Self {
            mailer: builder.build(),
            from: Mailbox::new(config.from_name.clone(), address),
            subject_prefix: config.subject_prefix.clone(),
        })
    }

    async fn deliver(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        content: &ReportContent,
    ) -> Result<(), DeliveryError> {
        let message = compose(
            &self.from,
            self.subject_prefix.as_deref(),
            recipient_email,
            recipient_name,
            content,
        )?;
        debug!(to = recipient_email, "handing message to SMTP relay");
        self.mailer.send(message).await?;
        info!(to = recipient_email, subject = %content.subject, "report email sent");
        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(
        &self,
        recipient_email: &str,
        recipient_name: &str,
        content: &ReportContent,
    ) -> Result<(), TransportError> {
        self.deliver(recipient_email, recipient_name, content)
            .await
            .map_err(TransportError::from)
    }
}

/// Build the MIME message: plain text, or text + HTML alternatives when the
/// report carries an HTML rendering.
fn compose(
    from: &Mailbox,
    subject_prefix: Option<&str>,
    recipient_email: &str,
    recipient_name: &str,
    content: &ReportContent,
) -> Result<Message, DeliveryError> {
    let name = Some(recipient_name.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let to = Mailbox::new(name, recipient_email.parse()?);

    let subject = match subject_prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix} {}", content.subject),
        None => content.subject.clone(),
    };

    let builder = Message::builder().from(from.clone()).to(to).subject(subject);
    match &content.html_body {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            content.text_body.clone(),
            html.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(content.text_body.clone()),
    }
    .map_err(|e| DeliveryError::Build(e.to_string()))
}
