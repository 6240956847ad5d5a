//! Adaptive tutor CLI
//!
//! Serves the tutor API, runs single interactions and writes weekly reports.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tutor_orchestrator::{
    create_router, AppState, Config, Context, InteractionRequest, LearnerProfile, MemoryStore,
    Orchestrator, Persistence, Schedule,
};
use tutor_report::{
    json::JsonGenerator, DayActivity, MarkdownGenerator, MasteryCounts, PillarScores,
    ReportInput, WeeklyReport, DAYS_IN_WEEK,
};

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// How often expired speaking sessions are swept while serving.
const EVICTION_INTERVAL_SECS: u64 = 60;

/// Adaptive tutor
///
/// Routes learner interactions through assessment, practice, scheduling and
/// progress tracking, backed by an SM-2 spaced-repetition engine.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Path to the data snapshot (default: dataFile from the configuration)
    #[arg(short, long, value_name = "FILE", global = true)]
    data: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API and walk-event websocket
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Run one interaction and print the response
    Ask {
        /// Learner identifier
        learner: String,

        /// Request type, e.g. get_schedule or vocabulary_exercise
        request_type: String,

        /// Activity input as a JSON object
        #[arg(short, long, value_name = "JSON")]
        input: Option<String>,
    },

    /// Write the weekly progress report for a learner
    Report {
        /// Learner identifier
        learner: String,

        /// Last day of the week to report (default: today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<String>,

        /// Output directory for reports
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, data = ?args.data, "Starting tutor");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let data_path = PathBuf::from(args.data.as_deref().unwrap_or(&config.data_file));

    match args.command {
        Command::Serve { port } => serve(config, &data_path, port).await,
        Command::Ask {
            learner,
            request_type,
            input,
        } => ask(config, &data_path, learner, request_type, input.as_deref()).await,
        Command::Report {
            learner,
            date,
            output_dir,
        } => report(&data_path, &learner, date.as_deref(), &output_dir).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Serves the API until Ctrl+C, then saves the data snapshot.
async fn serve(config: Config, data_path: &Path, port: u16) -> anyhow::Result<()> {
    print_config(&config, data_path);

    let store = load_store(data_path).await?;
    let orchestrator = build_orchestrator(config, &store);

    let shutdown = CancellationToken::new();
    let eviction = tokio::spawn(evict_sessions(orchestrator.clone(), shutdown.clone()));

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let router = create_router(AppState::new(orchestrator));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down");
            }
            server_shutdown.cancel();
        })
        .await;

    shutdown.cancel();
    if let Err(e) = eviction.await {
        tracing::warn!(error = %e, "Session eviction task failed");
    }

    store.save(data_path).await?;
    println!("Data saved to {}", data_path.display());

    served.context("HTTP server error")
}

/// Runs one interaction against the snapshot and prints the response.
async fn ask(
    config: Config,
    data_path: &Path,
    learner: String,
    request_type: String,
    input: Option<&str>,
) -> anyhow::Result<()> {
    let mut request = InteractionRequest::new(learner, request_type);
    if let Some(input) = input {
        let value = serde_json::from_str(input).map_err(|e| {
            anyhow::anyhow!("Invalid --input JSON: {e}\n\nSuggestion: Pass a JSON object, e.g. '{{\"date\": \"2026-03-02\"}}'")
        })?;
        request = request.with_input(value);
    }

    let store = load_store(data_path).await?;
    let orchestrator = build_orchestrator(config, &store);
    let response = orchestrator.handle(&request).await;

    store.save(data_path).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Writes `weekly-report.md` and `weekly-report.json` for one learner.
async fn report(
    data_path: &Path,
    learner_id: &str,
    date: Option<&str>,
    output_dir: &Path,
) -> anyhow::Result<()> {
    let week_end = match date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            anyhow::anyhow!("Invalid --date '{date}': {e}\n\nSuggestion: Use the YYYY-MM-DD format")
        })?,
        None => Utc::now().date_naive(),
    };
    let week_start = week_end
        .checked_sub_days(Days::new(u64::from(DAYS_IN_WEEK - 1)))
        .ok_or_else(|| anyhow::anyhow!("Date {week_end} is out of range"))?;

    let Some(store) = MemoryStore::load(data_path).await? else {
        anyhow::bail!(
            "Data file not found: '{}'\n\nSuggestion: Run 'tutor serve' or 'tutor ask' first, or pass --data",
            data_path.display()
        );
    };
    let profile = store.get_learner(learner_id).await?.ok_or_else(|| {
        anyhow::anyhow!(
            "Learner not found: '{learner_id}'\n\nSuggestion: Check the learner id in {}",
            data_path.display()
        )
    })?;
    let schedules = store
        .list_schedules(learner_id, week_start, week_end)
        .await?;

    let report = WeeklyReport::build(&create_report_input(&profile, &schedules, week_end))?;

    std::fs::create_dir_all(output_dir)?;

    let md_path = output_dir.join("weekly-report.md");
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("Markdown report: {}", md_path.display());

    let json_path = output_dir.join("weekly-report.json");
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("JSON report: {}", json_path.display());

    println!();
    println!(
        "{}: {} minutes over {} of {DAYS_IN_WEEK} days, overall score {:.1}%",
        report.display_name(),
        report.total_study_minutes,
        report.days_active,
        report.overall_score
    );

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Loads the data snapshot, or starts empty when there is none yet.
async fn load_store(data_path: &Path) -> anyhow::Result<Arc<MemoryStore>> {
    if let Some(store) = MemoryStore::load(data_path).await? {
        tracing::info!(path = %data_path.display(), "Loaded data snapshot");
        return Ok(Arc::new(store));
    }
    tracing::info!(path = %data_path.display(), "No data snapshot found, starting empty");
    Ok(Arc::new(MemoryStore::new()))
}

fn build_orchestrator(config: Config, store: &Arc<MemoryStore>) -> Orchestrator {
    let persistence: Arc<dyn Persistence> = Arc::clone(store) as Arc<dyn Persistence>;
    Orchestrator::new(Context::new(Arc::new(config), persistence))
}

/// Sweeps expired speaking sessions until `shutdown` is cancelled.
async fn evict_sessions(orchestrator: Orchestrator, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(EVICTION_INTERVAL_SECS));
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let evicted = orchestrator.context().sessions.evict_expired().await;
                if evicted > 0 {
                    tracing::info!(evicted, "Evicted expired speaking sessions");
                }
            }
        }
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config, data_path: &Path) {
    println!("Configuration loaded:");
    println!("  Data file: {}", data_path.display());
    println!("  Node timeout: {}s", config.node_timeout_seconds);
    println!("  Default level: {}", config.default_level);
    println!(
        "  Default daily goal: {} minutes",
        config.default_daily_goal_minutes
    );
    println!(
        "  Speaking sessions: {} max, {}s idle timeout",
        config.session.max_sessions, config.session.ttl_seconds
    );
}

/// Creates a `ReportInput` from the learner profile and the week's schedules.
fn create_report_input(
    profile: &LearnerProfile,
    schedules: &[Schedule],
    week_end: NaiveDate,
) -> ReportInput {
    ReportInput {
        learner_id: profile.id.clone(),
        learner_name: profile.name.clone(),
        level: profile.level.to_string(),
        week_end,
        daily_goal_minutes: profile.daily_goal_minutes,
        current_streak: profile.stats.current_streak,
        longest_streak: profile.stats.longest_streak,
        scores: PillarScores {
            vocabulary: profile.scores.vocabulary,
            grammar: profile.scores.grammar,
            pronunciation: profile.scores.pronunciation,
            speaking: profile.scores.speaking,
        },
        mastery: MasteryCounts {
            vocabulary_mastered: profile.mastery.vocabulary_mastered,
            grammar_rules_practiced: profile.mastery.grammar_rules_practiced,
            pronunciation_mastered: profile.mastery.pronunciation_mastered,
            speaking_sessions: profile.mastery.speaking_sessions,
        },
        days: schedules.iter().map(convert_schedule).collect(),
    }
}

/// Converts a persisted `Schedule` to a `DayActivity`.
const fn convert_schedule(schedule: &Schedule) -> DayActivity {
    DayActivity {
        date: schedule.date,
        minutes_studied: schedule.goal_progress.minutes_studied,
        activities_completed: schedule.goal_progress.activities_completed,
        planned_activities: schedule.goal_progress.total_activities,
    }
}
