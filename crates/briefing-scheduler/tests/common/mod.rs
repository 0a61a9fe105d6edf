// In-process stand-ins for the report service and the mail relay.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use briefing_core::config::SchedulerConfig;
use briefing_scheduler::{
    Frequency, GenerateError, NewSubscription, RecipientContext, ReportContent, ReportGenerator,
    ReportKind, Scheduler, SubscriptionStore, Transport, TransportError,
};
use chrono::{DateTime, NaiveTime, Utc};

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn daily(email: &str, hh: u32, tz: &str) -> NewSubscription {
    NewSubscription {
        recipient_email: email.to_string(),
        recipient_name: email.split('@').next().unwrap().to_string(),
        report_kind: ReportKind::CompetitiveIntelligence,
        frequency: Frequency::Daily,
        preferred_time: NaiveTime::from_hms_opt(hh, 0, 0).unwrap(),
        time_zone: tz.to_string(),
        query_template: "competitors in {industry}".to_string(),
        focus_areas: vec!["pricing".to_string()],
    }
}

pub fn settings(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_secs: 3600,
        max_concurrent_dispatches: max_concurrent,
        generate_timeout_secs: 5,
        send_timeout_secs: 5,
        stale_dispatch_secs: 900,
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl FakeGenerator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ReportGenerator for FakeGenerator {
    async fn generate(
        &self,
        kind: ReportKind,
        recipient: &RecipientContext,
    ) -> Result<ReportContent, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(GenerateError::Unavailable("research service returned 503".into()));
        }
        Ok(ReportContent {
            subject: format!("{} for {}", kind.label(), recipient.recipient_name),
            summary: format!("{} focus areas", recipient.focus_areas.len()),
            text_body: "body".to_string(),
            html_body: None,
        })
    }
}

/// Records every recipient in send order.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
    /// Recipients for which `send` returns an error.
    pub reject: Vec<String>,
    /// Recipients for which `send` panics.
    pub explode: Vec<String>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        recipient_email: &str,
        _recipient_name: &str,
        _content: &ReportContent,
    ) -> Result<(), TransportError> {
        if self.explode.iter().any(|e| e == recipient_email) {
            panic!("relay client blew up");
        }
        if self.reject.iter().any(|e| e == recipient_email) {
            return Err(TransportError::Rejected("550 mailbox unavailable".into()));
        }
        self.sent.lock().unwrap().push(recipient_email.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<SubscriptionStore>,
    pub generator: Arc<FakeGenerator>,
    pub transport: Arc<RecordingTransport>,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(
        generator: FakeGenerator,
        transport: RecordingTransport,
        config: SchedulerConfig,
    ) -> Self {
        let store = Arc::new(SubscriptionStore::open_in_memory().unwrap());
        Self::with_store(store, Arc::new(generator), Arc::new(transport), config)
    }

    pub fn with_store(
        store: Arc<SubscriptionStore>,
        generator: Arc<FakeGenerator>,
        transport: Arc<RecordingTransport>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            generator.clone(),
            transport.clone(),
            config,
        );
        Self {
            store,
            generator,
            transport,
            scheduler,
        }
    }
}
