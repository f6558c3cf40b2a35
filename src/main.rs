use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use confsync::alarms::{AlarmServices, RecordingTimerService, SchedulableAlarm, TokioTimerService};
use confsync::config::{self, get_config_path, load_config, AppConfig};
use confsync::parser::JsonScheduleParser;
use confsync::store::FileStore;
use confsync::sync::auto_update::{AutoUpdater, LogNotifier};
use confsync::sync::observer::fetch_failure_message;
use confsync::sync::{Broadcaster, SyncManager, SyncStatus};

#[derive(Parser)]
#[command(name = "confsync", version, about = "Keep a conference schedule in sync")]
struct Cli {
    /// Use this config file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronization attempt and print its statuses
    Sync {
        /// Report failures as if the user asked for the update
        #[arg(long)]
        user: bool,
        /// Override the configured schedule URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Keep refreshing in the background and fire session reminders
    Watch,
    /// Schedule or discard a session reminder (dry run)
    Alarm {
        #[command(subcommand)]
        action: AlarmAction,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AlarmAction {
    Add {
        #[command(flatten)]
        session: AlarmArgs,
        /// Replace an existing reminder for the same session
        #[arg(long)]
        replace: bool,
    },
    Remove {
        #[command(flatten)]
        session: AlarmArgs,
    },
}

#[derive(clap::Args)]
struct AlarmArgs {
    #[arg(long)]
    session_id: String,
    #[arg(long)]
    day: i32,
    #[arg(long)]
    title: String,
    /// RFC 3339 start time, e.g. 2026-12-27T11:00:00+01:00
    #[arg(long)]
    start: String,
}

impl AlarmArgs {
    fn to_alarm(&self) -> Result<SchedulableAlarm> {
        let start = DateTime::parse_from_rfc3339(&self.start)
            .with_context(|| format!("Invalid start time: {}", self.start))?;
        Ok(SchedulableAlarm {
            session_id: self.session_id.clone(),
            day: self.day,
            session_title: self.title.clone(),
            start_time: start.with_timezone(&Utc).timestamp_millis(),
        })
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    SetUrl { url: String },
}

fn init_logging(level: LevelFilter, log_file: Option<&PathBuf>) -> Result<()> {
    let log_config = ConfigBuilder::new().set_target_level(LevelFilter::Error).build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file: {}", path.display()))?;
        loggers.push(WriteLogger::new(level, log_config, file));
    }
    CombinedLogger::init(loggers).context("Failed to initialize logger")
}

fn open_manager(app_config: &AppConfig, url: &str) -> Result<SyncManager> {
    let store = FileStore::open(&FileStore::default_path()?, url)?;
    SyncManager::new(
        &app_config.to_sync_config(),
        Arc::new(JsonScheduleParser),
        Arc::new(store),
    )
}

async fn run_sync(app_config: &AppConfig, user: bool, url: Option<String>) -> Result<()> {
    let url = url.unwrap_or_else(|| app_config.schedule_url.clone());
    if url.is_empty() {
        bail!("No schedule URL configured. Use `confsync config set-url <url>` or --url.");
    }
    let manager = open_manager(app_config, &url)?;
    let mut statuses = Broadcaster::global().subscribe();
    let mut changes = manager.schedule_changes();

    let final_status = manager.load_schedule(user).join().await?;
    for status in statuses.drain() {
        println!("{:?}", status);
    }
    match final_status {
        Some(SyncStatus::FetchFailure { http_status, host_name, exception_message, .. }) => {
            println!("{}", fetch_failure_message(http_status, &host_name, &exception_message));
        }
        Some(SyncStatus::ParseSuccess) => {
            let sessions = manager.store().load_sessions();
            println!("Schedule {} with {} sessions", manager.store().read_meta().version, sessions.len());
            if let Some(parameter) = changes.try_next() {
                println!(
                    "{} changes since the last acknowledged version ({} favorites affected)",
                    parameter.change_statistic.total(),
                    parameter.change_statistic.changed_favorites_count
                );
            }
        }
        Some(SyncStatus::ParseFailure { parse_result }) => {
            println!("The schedule could not be parsed (version '{}')", parse_result.version);
        }
        _ => {}
    }
    Ok(())
}

async fn run_watch(app_config: &AppConfig) -> Result<()> {
    if app_config.schedule_url.is_empty() {
        bail!("No schedule URL configured. Use `confsync config set-url <url>`.");
    }
    let manager = Arc::new(open_manager(app_config, &app_config.schedule_url)?);
    let (timer, fired_rx) = TokioTimerService::new()?;
    let alarms = AlarmServices::new(Arc::new(timer));

    for session in manager.store().load_sessions() {
        if session.is_highlight && session.date_utc > Utc::now().timestamp_millis() {
            alarms.schedule_session_alarm(&session.to_schedulable_alarm(), true);
        }
    }

    let interval = app_config.auto_update_interval();
    let updater = AutoUpdater::new(manager, alarms, Arc::new(LogNotifier), interval);
    info!("Watch: Updating every {} minutes, press Ctrl+C to stop", interval.num_minutes());
    updater.update().await?;
    updater.run(fired_rx).await;
    Ok(())
}

fn run_alarm(action: AlarmAction) -> Result<()> {
    let timer = Arc::new(RecordingTimerService::new());
    let alarms = AlarmServices::new(timer.clone());
    match action {
        AlarmAction::Add { session, replace } => {
            alarms.schedule_session_alarm(&session.to_alarm()?, replace)
        }
        AlarmAction::Remove { session } => alarms.discard_session_alarm(&session.to_alarm()?),
    }
    for registration in timer.registrations() {
        println!("{} -> {}", registration.trigger, registration.trigger_at_millis);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let app_config = load_config(&config_path).context("Failed to load configuration")?;
    let level = if cli.verbose { LevelFilter::Debug } else { app_config.log_level_filter() };
    init_logging(level, cli.log_file.as_ref())?;

    match cli.command {
        Command::Sync { user, url } => run_sync(&app_config, user, url).await,
        Command::Watch => run_watch(&app_config).await,
        Command::Alarm { action } => run_alarm(action),
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&app_config).context("Failed to serialize config")?);
                Ok(())
            }
            ConfigAction::SetUrl { url } => {
                let updated = AppConfig { schedule_url: url, ..app_config };
                config::save_config(&updated, &config_path)?;
                println!("Saved {}", config_path.display());
                Ok(())
            }
        },
    }
}
