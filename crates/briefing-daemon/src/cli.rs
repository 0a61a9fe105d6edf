use briefing_scheduler::{schedule::parse_time_of_day, Frequency, ReportKind};
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "briefingd", version, about = "Recurring report delivery daemon")]
pub struct Cli {
    /// Config file (default: $BRIEFING_CONFIG, then ~/.briefing/briefing.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the driver loop until interrupted.
    Run,
    /// Run a single cycle and exit (for cron / external task schedulers).
    RunOnce {
        /// List what is due without sending or advancing anything.
        #[arg(long)]
        dry_run: bool,
        /// Only subscriptions in this IANA time zone.
        #[arg(long)]
        time_zone: Option<String>,
    },
    /// Create a subscription.
    Add(AddArgs),
    /// List subscriptions with their next delivery in local time.
    List,
    /// Resume deliveries; the next run is computed from now.
    Activate { id: String },
    /// Pause deliveries.
    Deactivate { id: String },
    /// Change frequency, preferred time or time zone.
    Reschedule(RescheduleArgs),
    /// Show the delivery audit trail of a subscription.
    Deliveries {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    #[arg(long)]
    pub email: String,
    #[arg(long, default_value = "")]
    pub name: String,
    #[arg(long, default_value = "comprehensive")]
    pub kind: ReportKind,
    #[arg(long, default_value = "daily")]
    pub frequency: Frequency,
    /// Local delivery time, HH:MM.
    #[arg(long, value_parser = parse_time_of_day, default_value = "09:00")]
    pub time: NaiveTime,
    #[arg(long, default_value = "UTC")]
    pub time_zone: String,
    #[arg(long, default_value = "")]
    pub query: String,
    /// Comma-separated focus areas.
    #[arg(long, value_delimiter = ',')]
    pub focus: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RescheduleArgs {
    pub id: String,
    #[arg(long)]
    pub frequency: Option<Frequency>,
    #[arg(long, value_parser = parse_time_of_day)]
    pub time: Option<NaiveTime>,
    #[arg(long)]
    pub time_zone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_once_flags_parse() {
        let cli = Cli::try_parse_from([
            "briefingd",
            "run-once",
            "--dry-run",
            "--time-zone",
            "Europe/Berlin",
        ])
        .unwrap();
        match cli.command {
            Command::RunOnce { dry_run, time_zone } => {
                assert!(dry_run);
                assert_eq!(time_zone.as_deref(), Some("Europe/Berlin"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn add_parses_kind_time_and_focus() {
        let cli = Cli::try_parse_from([
            "briefingd",
            "--config",
            "/etc/briefing.toml",
            "add",
            "--email",
            "ada@example.com",
            "--kind",
            "market_trends_agent",
            "--frequency",
            "weekly",
            "--time",
            "07:30",
            "--focus",
            "pricing,launches",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/briefing.toml"));
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.kind, ReportKind::MarketTrends);
        assert_eq!(args.frequency, Frequency::Weekly);
        assert_eq!(args.time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(args.focus, vec!["pricing".to_string(), "launches".to_string()]);
        assert_eq!(args.time_zone, "UTC");
    }

    #[test]
    fn bad_time_is_rejected() {
        let err = Cli::try_parse_from(["briefingd", "add", "--email", "a@b.io", "--time", "25:00"]);
        assert!(err.is_err());
    }
}
