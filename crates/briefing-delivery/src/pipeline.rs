use async_trait::async_trait;
use briefing_core::config::PipelineConfig;
use briefing_scheduler::{
    GenerateError, RecipientContext, ReportContent, ReportGenerator, ReportKind,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DeliveryError;

#[derive(Serialize)]
struct ReportRequest<'a> {
    report_kind: ReportKind,
    recipient: &'a RecipientContext,
}

/// Client for the report-generation service.
///
/// `POST {base_url}/reports/{kind}` with the recipient context as JSON; the
/// service answers with a [`ReportContent`] document.
pub struct HttpReportPipeline {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpReportPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }
    }

    async fn request(
        &self,
        kind: ReportKind,
        recipient: &RecipientContext,
    ) -> Result<ReportContent, DeliveryError> {
        let url = format!("{}/reports/{}", self.base_url, kind.as_str());
        debug!(%url, subscription_id = %recipient.subscription_id, "requesting report");

        let mut req = self.client.post(&url).json(&ReportRequest {
            report_kind: kind,
            recipient,
        });
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "report service error");
            return Err(DeliveryError::Api {
                status,
                message: text,
            });
        }

        let content: ReportContent = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Parse(e.to_string()))?;
        if content.subject.trim().is_empty() {
            return Err(DeliveryError::Parse("report has an empty subject".into()));
        }
        Ok(content)
    }
}

#[async_trait]
impl ReportGenerator for HttpReportPipeline {
    async fn generate(
        &self,
        kind: ReportKind,
        recipient: &RecipientContext,
    ) -> Result<ReportContent, GenerateError> {
        self.request(kind, recipient)
            .await
            .map_err(GenerateError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefing_core::SubscriptionId;
    use briefing_scheduler::Frequency;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recipient() -> RecipientContext {
        RecipientContext {
            subscription_id: SubscriptionId::from("sub-1"),
            recipient_email: "ada@example.com".into(),
            recipient_name: "Ada".into(),
            frequency: Frequency::Weekly,
            query_template: "email security".into(),
            focus_areas: vec!["pricing".into(), "launches".into()],
        }
    }

    fn pipeline(server: &MockServer, token: Option<&str>) -> HttpReportPipeline {
        HttpReportPipeline::new(&PipelineConfig {
            base_url: format!("{}/", server.uri()),
            api_token: token.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn posts_context_and_parses_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reports/market_trends"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "report_kind": "market_trends",
                "recipient": {
                    "recipient_email": "ada@example.com",
                    "focus_areas": ["pricing", "launches"]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subject": "Market Trends",
                "summary": "Quiet week",
                "text_body": "Nothing to report",
                "html_body": "<p>Nothing to report</p>"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let content = pipeline(&server, Some("secret"))
            .generate(ReportKind::MarketTrends, &recipient())
            .await
            .unwrap();
        assert_eq!(content.subject, "Market Trends");
        assert_eq!(content.html_body.as_deref(), Some("<p>Nothing to report</p>"));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = pipeline(&server, None)
            .generate(ReportKind::Comprehensive, &recipient())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Unavailable(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = pipeline(&server, None)
            .generate(ReportKind::ProductIntelligence, &recipient())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_subject_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "subject": " ",
                "summary": "",
                "text_body": ""
            })))
            .mount(&server)
            .await;

        let err = pipeline(&server, None)
            .generate(ReportKind::CompetitiveIntelligence, &recipient())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::InvalidResponse(_)));
    }
}
