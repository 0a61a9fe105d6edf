use std::sync::Arc;

use anyhow::{bail, Context};
use briefing_core::{config::BriefingConfig, SubscriptionId};
use briefing_delivery::{HttpReportPipeline, SmtpTransport};
use briefing_scheduler::{
    next_delivery_local, DueFilter, NewSubscription, ScheduleChange, Scheduler, Subscription,
    SubscriptionStore,
};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

mod cli;

use cli::{AddArgs, Cli, Command, RescheduleArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "briefingd=info,briefing_scheduler=info,briefing_delivery=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > BRIEFING_CONFIG env > ~/.briefing/briefing.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("BRIEFING_CONFIG").ok());
    let config = BriefingConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        BriefingConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(
        SubscriptionStore::open(db_path)
            .with_context(|| format!("opening subscription store at {db_path}"))?,
    );

    match cli.command {
        Command::Run => run(store, &config).await,
        Command::RunOnce { dry_run, time_zone } => {
            let filter = DueFilter { time_zone };
            if dry_run {
                dry_run_cycle(&store, &filter)
            } else {
                let report = build_scheduler(store, &config)?.run_once(&filter).await?;
                println!(
                    "selected {}  sent {}  failed {}  skipped {}  errors {}  flagged {}",
                    report.selected,
                    report.sent,
                    report.failed,
                    report.skipped,
                    report.errors,
                    report.flagged
                );
                Ok(())
            }
        }
        Command::Add(args) => add(&store, args),
        Command::List => {
            for sub in store.list()? {
                println!("{}", describe(&sub));
            }
            for row in store.list_unreadable()? {
                println!("{}  [unreadable: {}]", row.id, row.reason);
            }
            Ok(())
        }
        Command::Activate { id } => {
            let sub = store.set_active(&SubscriptionId::from(id), true, Utc::now())?;
            println!("{}", describe(&sub));
            Ok(())
        }
        Command::Deactivate { id } => {
            let sub = store.set_active(&SubscriptionId::from(id), false, Utc::now())?;
            println!("{}", describe(&sub));
            Ok(())
        }
        Command::Reschedule(args) => reschedule(&store, args),
        Command::Deliveries { id, limit } => {
            for record in store.deliveries_for(&SubscriptionId::from(id), limit)? {
                println!(
                    "{}  {:<7}  {}  {}",
                    record.attempted_at.format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    record.subject.as_deref().unwrap_or("-"),
                    record.error_detail.as_deref().unwrap_or(""),
                );
            }
            Ok(())
        }
    }
}

/// Long-running mode: drive cycles until SIGINT/SIGTERM, then let in-flight
/// dispatches finish.
async fn run(store: Arc<SubscriptionStore>, config: &BriefingConfig) -> anyhow::Result<()> {
    let scheduler = build_scheduler(store, config)?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("stop signal received; finishing in-flight deliveries");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

fn build_scheduler(
    store: Arc<SubscriptionStore>,
    config: &BriefingConfig,
) -> anyhow::Result<Scheduler> {
    let Some(smtp) = &config.smtp else {
        bail!("no [smtp] section configured; only `run-once --dry-run` is available");
    };
    let Some(pipeline) = &config.pipeline else {
        bail!("no [pipeline] section configured; only `run-once --dry-run` is available");
    };

    let transport = SmtpTransport::from_config(smtp).context("building SMTP transport")?;
    info!(host = %smtp.host, port = smtp.port, "SMTP transport ready");
    let generator = HttpReportPipeline::new(pipeline);
    info!(base_url = %pipeline.base_url, "report pipeline ready");

    Ok(Scheduler::new(
        store,
        Arc::new(generator),
        Arc::new(transport),
        config.scheduler.clone(),
    ))
}

fn dry_run_cycle(store: &SubscriptionStore, filter: &DueFilter) -> anyhow::Result<()> {
    let due = store.select_due(Utc::now(), filter)?;
    if due.is_empty() {
        println!("nothing due");
    }
    for sub in &due {
        println!(
            "would send {} to {} ({})",
            sub.report_kind.label(),
            sub.recipient_email,
            next_delivery_local(sub)
        );
    }
    Ok(())
}

fn add(store: &SubscriptionStore, args: AddArgs) -> anyhow::Result<()> {
    let sub = store.create(
        NewSubscription {
            recipient_email: args.email,
            recipient_name: args.name,
            report_kind: args.kind,
            frequency: args.frequency,
            preferred_time: args.time,
            time_zone: args.time_zone,
            query_template: args.query,
            focus_areas: args
                .focus
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        },
        Utc::now(),
    )?;
    println!("{}", describe(&sub));
    Ok(())
}

fn reschedule(store: &SubscriptionStore, args: RescheduleArgs) -> anyhow::Result<()> {
    if args.frequency.is_none() && args.time.is_none() && args.time_zone.is_none() {
        bail!("nothing to change: pass --frequency, --time or --time-zone");
    }
    let sub = store.update_schedule(
        &SubscriptionId::from(args.id),
        ScheduleChange {
            frequency: args.frequency,
            preferred_time: args.time,
            time_zone: args.time_zone,
        },
        Utc::now(),
    )?;
    println!("{}", describe(&sub));
    Ok(())
}

/// One-line summary used by `list` and the mutating commands.
fn describe(sub: &Subscription) -> String {
    let state = match (&sub.schedule_error, sub.is_active) {
        (Some(err), _) => format!("flagged: {err}"),
        (None, true) => "active".to_string(),
        (None, false) => "inactive".to_string(),
    };
    format!(
        "{}  {}  {} {} at {} {}  next: {}  sent: {}  [{}]",
        sub.id,
        sub.recipient_email,
        sub.frequency,
        sub.report_kind,
        sub.preferred_time.format("%H:%M"),
        sub.time_zone,
        next_delivery_local(sub),
        sub.total_reports_sent,
        state
    )
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {e}"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), "could not create database directory: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefing_scheduler::{Frequency, ReportKind};
    use chrono::{DateTime, NaiveTime};

    fn sample() -> Subscription {
        let at = DateTime::parse_from_rfc3339("2025-03-10T13:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Subscription {
            id: SubscriptionId::from("sub-1"),
            recipient_email: "ada@example.com".into(),
            recipient_name: "Ada".into(),
            report_kind: ReportKind::MarketTrends,
            frequency: Frequency::Weekly,
            preferred_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            time_zone: "America/New_York".into(),
            query_template: String::new(),
            focus_areas: vec![],
            is_active: true,
            last_run_at: None,
            next_run_at: Some(at),
            anchor_day: Some(10),
            total_reports_sent: 3,
            schedule_error: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn ensure_parent_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state/briefing/briefing.db");
        ensure_parent_dir(db.to_str().unwrap());
        assert!(dir.path().join("state/briefing").is_dir());
    }

    #[test]
    fn ensure_parent_dir_survives_a_blocked_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let db = blocker.join("briefing.db");
        ensure_parent_dir(db.to_str().unwrap());
        assert!(blocker.is_file());
    }

    #[test]
    fn describe_shows_local_next_run() {
        let line = describe(&sample());
        assert!(line.contains("weekly market_trends at 09:00 America/New_York"));
        assert!(line.contains("next: 2025-03-10 09:00 EDT"));
        assert!(line.ends_with("[active]"));
    }

    #[test]
    fn describe_surfaces_schedule_errors() {
        let mut sub = sample();
        sub.is_active = false;
        sub.next_run_at = None;
        sub.schedule_error = Some("Unknown time zone `Mars/Base`".into());
        let line = describe(&sub);
        assert!(line.contains("next: Not scheduled"));
        assert!(line.contains("[flagged: Unknown time zone `Mars/Base`]"));
    }
}
