//! Note-posting and timeline CLI over `exolog_core`.
//!
//! # Responsibility
//! - Build event payloads from command-line input and run them through the
//!   core ingestion path.
//! - Print filtered listings and today's timeline as JSON.
//!
//! # Invariants
//! - The CLI owns the connection lifecycle; the core only borrows it.
//! - Day bounds for `today` are computed here, never in core.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use exolog_core::db::open_db;
use exolog_core::model::event::KNOWN_DIRECTIONS;
use exolog_core::{
    core_version, init_logging_from_config, CoreConfig, DistinctColumn, Event, EventFilter,
    EventPayload, EventService, SqliteEventRepository,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Exolog - personal event log
#[derive(Parser)]
#[command(name = "exolog")]
#[command(about = "Post notes to and read from a personal event log")]
#[command(version)]
struct Cli {
    /// SQLite database file (overrides EXOLOG_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log level: trace|debug|info|warn|error (overrides EXOLOG_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Absolute directory for rolling logs (overrides EXOLOG_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its indexes if missing
    Init,
    /// Store a note event
    Note {
        /// Full text of the note
        text: String,
        /// Short summary (defaults to the first 80 characters of the text)
        #[arg(long)]
        summary: Option<String>,
        /// Tag; repeatable, and each value may be comma-separated
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// ISO-8601 timestamp (defaults to now, UTC)
        #[arg(long)]
        timestamp: Option<String>,
        #[arg(long, default_value = "manual_note")]
        source_system: String,
        #[arg(long, default_value = "note")]
        channel: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long, value_parser = PossibleValuesParser::new(KNOWN_DIRECTIONS.iter().copied()))]
        direction: Option<String>,
    },
    /// List events matching filters, newest first
    List {
        /// Inclusive ISO-8601 lower bound
        #[arg(long)]
        start: Option<String>,
        /// Inclusive ISO-8601 upper bound
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        source_system: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        /// Required tag; repeat to require several
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Show today's events (UTC day)
    Today {
        #[arg(long, default_value_t = exolog_core::query::DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },
    /// List distinct values of source-system, channel, actor or direction
    Values {
        column: String,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = resolve_config(&cli)?;
    init_logging_from_config(&config)?;

    let conn = open_db(&config.db_path)?;
    let repo = SqliteEventRepository::try_new(&conn)?;
    let service = EventService::new(repo);

    match cli.command {
        Commands::Init => {
            info!("event=cli_init module=cli status=ok version={}", core_version());
            println!("Database ready at {}", config.db_path.display());
        }
        Commands::Note {
            text,
            summary,
            tags,
            timestamp,
            source_system,
            channel,
            actor,
            direction,
        } => {
            let timestamp = timestamp.unwrap_or_else(now_iso);
            let mut payload = EventPayload::new(timestamp, source_system, channel)
                .with_text(text)
                .with_tags(split_tag_args(&tags));
            payload.summary = summary;
            payload.actor = actor;
            payload.direction = direction;

            let event = service.ingest(&payload)?;
            print_json(&event)?;
        }
        Commands::List {
            start,
            end,
            source_system,
            channel,
            tags,
            limit,
            offset,
        } => {
            let limit = limit.map(|value| value.to_string());
            let offset = offset.map(|value| value.to_string());
            let mut params: Vec<(&str, &str)> = Vec::new();
            push_param(&mut params, "start", start.as_deref());
            push_param(&mut params, "end", end.as_deref());
            push_param(&mut params, "source_system", source_system.as_deref());
            push_param(&mut params, "channel", channel.as_deref());
            for tag in &tags {
                params.push(("tag", tag.as_str()));
            }
            push_param(&mut params, "limit", limit.as_deref());
            push_param(&mut params, "offset", offset.as_deref());

            let events = service.list_with_params(params)?;
            print_json(&events)?;
        }
        Commands::Today { limit } => {
            let (start, end) = day_bounds(Utc::now().date_naive());
            let filter = EventFilter::new(limit).between(start, end);
            let events: Vec<Event> = service.list(&filter)?;
            print_json(&events)?;
        }
        Commands::Values { column } => {
            let column = DistinctColumn::parse(&column).ok_or_else(|| {
                format!("unsupported column `{column}`; expected source-system|channel|actor|direction")
            })?;
            for value in service.distinct_values(column)? {
                println!("{value}");
            }
        }
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> CliResult<CoreConfig> {
    let mut config = CoreConfig::from_env()?;
    if let Some(db) = cli.db.as_ref() {
        config.db_path = db.clone();
    }
    if let Some(level) = cli.log_level.as_deref() {
        config = config.with_log_level(level)?;
    }
    if let Some(log_dir) = cli.log_dir.as_ref() {
        config.log_dir = Some(log_dir.clone());
    }
    Ok(config)
}

fn push_param<'a>(params: &mut Vec<(&'a str, &'a str)>, key: &'a str, value: Option<&'a str>) {
    if let Some(value) = value {
        params.push((key, value));
    }
}

/// Splits repeated `--tag` values on commas, dropping blanks.
fn split_tag_args(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inclusive UTC bounds covering one calendar day.
fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1) - Duration::microseconds(1);
    (start, end)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{day_bounds, split_tag_args};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn tag_args_split_on_commas_and_drop_blanks() {
        let args = vec!["exo, idea".to_string(), " ,walk".to_string()];
        assert_eq!(split_tag_args(&args), vec!["exo", "idea", "walk"]);
    }

    #[test]
    fn day_bounds_cover_the_whole_day_inclusively() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (start, end) = day_bounds(day);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert!(end > Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap());
    }
}
