use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod aggregate;
mod bot;
mod config;
mod db;
mod error;
mod logging;
mod models;
mod pdf;
mod period;
mod pipeline;
mod query;
mod report;
mod schedule;
mod sources;
mod telegram;

use crate::aggregate::StatsAggregator;
use crate::config::AppConfig;
use crate::db::DatabaseConnector;
use crate::models::{ReportPeriod, SourceHealth};
use crate::period::ReportClock;
use crate::pipeline::ReportPipeline;
use crate::report::ReportRenderer;
use crate::sources::{SourceProfile, SqlSourceAdapter};
use crate::telegram::TelegramClient;

#[derive(Parser)]
#[command(name = "consolidated-usage-report")]
#[command(about = "Unique-user statistics across five bot and system databases, reported to chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat bot and the report schedule
    Run,
    /// Render a report to a local PDF without delivering it
    Report {
        #[arg(long, value_enum, default_value_t = ReportPeriod::Weekly)]
        period: ReportPeriod,
        /// Report as if generated on this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the combined unique-user snapshot
    Stats {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Check every source for reachability and schema health
    Check,
    /// Export the combined snapshot as CSV
    Export {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "usage_snapshot.csv")]
        out: PathBuf,
    },
    /// List chats that recently messaged the bot
    ChatIds,
}

fn build_pipeline(config: &AppConfig, clock: ReportClock) -> ReportPipeline {
    let connector = DatabaseConnector::new(
        config.sources.clone(),
        config.query_timeout,
        config.timezone,
    );
    let aggregator = StatsAggregator::new(SqlSourceAdapter::all(Arc::new(connector)));
    ReportPipeline::new(
        aggregator,
        ReportRenderer::new(config.display_names.clone(), config.trend_window_days),
        clock,
        config.trend_window_days,
        config.reports_dir.clone(),
    )
}

/// End-of-day on `date` so a backfilled report covers that whole day.
fn clock_for(config: &AppConfig, date: Option<NaiveDate>) -> ReportClock {
    match date {
        Some(date) => {
            let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
            ReportClock::pinned(config.timezone, date.and_time(end_of_day))
        }
        None => ReportClock::new(config.timezone),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let token = config.bot_token()?;
    let client = TelegramClient::new(token).context("failed to build bot API client")?;
    let transport: Arc<dyn telegram::ChatTransport> = Arc::new(client.clone());
    let clock = ReportClock::new(config.timezone);
    let pipeline = build_pipeline(&config, clock);

    if config.admin_ids.is_empty() {
        warn!("ADMIN_CHAT_ID is empty, scheduled reports have no recipients and every command is refused");
    }

    let dispatcher = Arc::new(bot::Dispatcher::new(
        pipeline.clone(),
        transport.clone(),
        config.admin_ids.clone(),
        config.schedule,
        config.display_names.clone(),
    ));
    let scheduler = schedule::Scheduler::new(schedule::jobs(&config.schedule), clock.now());
    info!(
        timezone = %config.timezone,
        recipients = config.admin_ids.len(),
        "starting bot and scheduler"
    );

    tokio::select! {
        result = bot::poll(client, dispatcher) => result?,
        () = schedule::drive(scheduler, pipeline, transport, config.admin_ids.clone()) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    logging::init(&config.log_level).context("failed to initialise logging")?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Report { period, date, out } => {
            let reports = build_pipeline(&config, clock_for(&config, date));
            let document = reports.build_document(period).await;
            let bytes = pdf::write_pdf(&document)?;
            let out = out.unwrap_or_else(|| {
                PathBuf::from(crate::pipeline::report_file_name(period, document.generated_at))
            });
            std::fs::write(&out, bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Stats { date, json } => {
            let clock = clock_for(&config, date);
            let snapshot = build_pipeline(&config, clock)
                .aggregator()
                .combined_snapshot(clock.today())
                .await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!(
                    "{}",
                    report::build_stats_message(&snapshot, &config.display_names)
                );
            }
        }
        Commands::Check => {
            let clock = clock_for(&config, None);
            let snapshot = build_pipeline(&config, clock)
                .aggregator()
                .combined_snapshot(clock.today())
                .await;
            for entry in &snapshot.sources {
                let status = match &entry.health {
                    SourceHealth::Healthy => "ok".to_string(),
                    SourceHealth::SchemaDegraded { table, column } => {
                        format!("degraded ({table}.{column} missing, all-time counts)")
                    }
                    SourceHealth::Unavailable { reason } => format!("unavailable: {reason}"),
                };
                let target = config
                    .sources
                    .get(&entry.source)
                    .map(|descriptor| descriptor.to_string())
                    .unwrap_or_default();
                println!(
                    "- {} [{}] {}: today {} / week {} / month {} {}",
                    config.display_names.name(entry.source),
                    target,
                    status,
                    entry.stats.today,
                    entry.stats.week,
                    entry.stats.month,
                    SourceProfile::for_source(entry.source).domain.label()
                );
            }
            let unavailable = snapshot.unavailable_sources().len();
            println!(
                "{} of {} sources reachable.",
                snapshot.sources.len() - unavailable,
                snapshot.sources.len()
            );
        }
        Commands::Export { date, out } => {
            let clock = clock_for(&config, date);
            let snapshot = build_pipeline(&config, clock)
                .aggregator()
                .combined_snapshot(clock.today())
                .await;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_snapshot_csv(&snapshot, &config.display_names, file)?;
            println!("Snapshot for {} exported to {}.", snapshot.reference_date, out.display());
        }
        Commands::ChatIds => {
            let client = TelegramClient::new(config.bot_token()?)?;
            let updates = client
                .get_updates(None, 0)
                .await
                .context("failed to fetch recent updates")?;
            let chats: BTreeMap<i64, telegram::Chat> = updates
                .into_iter()
                .filter_map(|update| update.message)
                .map(|message| (message.chat.id, message.chat))
                .collect();

            if chats.is_empty() {
                println!("No recent messages. Send the bot a message and run this again.");
                return Ok(());
            }
            println!("Chats that recently messaged the bot:");
            for (id, chat) in &chats {
                println!("- {id} ({}, {})", chat.kind, chat.label());
            }
        }
    }

    Ok(())
}
