//! CLI parsing and command dispatch. Resolves settings from flags and the
//! config file, builds the fetch stack per theater, runs the orchestrator or
//! the read-side queries, and maps errors to exit codes.

use crate::config::{self, Config};
use crate::digest::{search_by_director, search_movie, theater_schedule, weekly_digest, MovieMatch};
use crate::fetch::{
    ChromiumEngine, FetchError, Fetcher, HttpClient, PageSource, DEFAULT_USER_AGENT,
};
use crate::orchestrator::{BatchResults, Orchestrator, OrchestratorError};
use crate::scraper::{ScrapeContext, Theater};
use crate::snapshot::{latest_combined_snapshot, load_combined, CombinedSnapshot, SnapshotError, SnapshotStore};
use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OUTPUT_DIR: &str = "output";
const TEST_OUTPUT_DIR: &str = "test_output";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_THEATER_DELAY_SECS: u64 = 2;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 10;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Failed to set up fetching: {0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Snapshot(#[from] SnapshotError),

    #[error("{0:#}")]
    Logging(anyhow::Error),

    #[error("{0:#}")]
    Query(anyhow::Error),
}

impl From<OrchestratorError> for CliRunError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::UnknownTheater { .. } => CliRunError::InvalidInput(e.to_string()),
            OrchestratorError::Snapshot(e) => CliRunError::Snapshot(e),
        }
    }
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Fetch(_) => 2,
            CliRunError::Snapshot(_) | CliRunError::Logging(_) => 3,
            CliRunError::Query(_) => 4,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cinescrape")]
#[command(about = "Scrape showtimes from Tokyo independent theaters into JSON snapshots")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, retry_count, retry_backoff_secs, request_delay_ms, theater_delay_secs, render_timeout_secs, chrome_executable, reference_year) are read from ./cinescrape.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Snapshot and log directory (overrides config; default ./output).
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// User-Agent for HTTP and the browser (overrides config).
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// HTTP request timeout in seconds (overrides config; default 30).
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Pause between theaters in seconds (overrides config; default 2).
    #[arg(long, global = true)]
    pub delay: Option<u64>,

    /// Year assumed for dates written without one (overrides config; default current year).
    #[arg(long, global = true, value_parser = parse_year)]
    pub year: Option<i32>,

    /// Suppress the progress spinner.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug logging and verbose error chain.
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scrape every theater and write per-theater, combined, and summary snapshots.
    All,
    /// Scrape one theater by key (see `list`).
    Theater { key: String },
    /// List theater keys.
    List,
    /// Scrape K's cinema into ./test_output as a smoke test.
    Test,
    /// Two-week digest from the latest combined snapshot.
    Digest {
        /// Any date in the first week of the digest (YYYY-MM-DD). Default: today.
        #[arg(long, value_parser = parse_week_of)]
        week_of: Option<NaiveDate>,
    },
    /// Search the latest combined snapshot.
    Search {
        query: String,
        /// What to match: title, director, or theater.
        #[arg(long, default_value = "title", value_parser = parse_search_by)]
        by: SearchBy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBy {
    Title,
    Director,
    Theater,
}

fn parse_search_by(s: &str) -> Result<SearchBy, String> {
    match s.to_lowercase().as_str() {
        "title" | "movie" => Ok(SearchBy::Title),
        "director" => Ok(SearchBy::Director),
        "theater" | "theatre" => Ok(SearchBy::Theater),
        _ => Err(format!(
            "Invalid --by value: '{}'. Use title, director, or theater.",
            s
        )),
    }
}

fn parse_week_of(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid --week-of: expected YYYY-MM-DD, got '{}'", s))
}

fn parse_year(s: &str) -> Result<i32, String> {
    let year: i32 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid --year: '{}' is not a number", s))?;
    if !(2000..=2100).contains(&year) {
        return Err(format!("Invalid --year: {} is out of range", year));
    }
    Ok(year)
}

/// Effective settings after merging flags over config over defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_backoff_secs: Vec<u64>,
    pub request_delay_ms: u64,
    pub theater_delay: Duration,
    pub render_timeout: Duration,
    pub chrome_executable: Option<PathBuf>,
    pub reference_year: Option<i32>,
}

impl Settings {
    /// Load the config file and merge it with `args`.
    pub fn resolve(args: &Args) -> Result<Self, CliRunError> {
        let config = config::load_config().map_err(CliRunError::InvalidInput)?;
        Ok(Self::from_sources(args, config.as_ref()))
    }

    pub fn from_sources(args: &Args, config: Option<&Config>) -> Self {
        let output_dir = match (&args.output_dir, &args.command) {
            (Some(dir), _) => dir.clone(),
            (None, Command::Test) => PathBuf::from(TEST_OUTPUT_DIR),
            (None, _) => config
                .and_then(|c| c.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        };
        Self {
            output_dir,
            user_agent: args
                .user_agent
                .clone()
                .or_else(|| config.and_then(|c| c.user_agent.clone()))
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_secs: args
                .timeout
                .or_else(|| config.and_then(|c| c.timeout_secs))
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: config
                .and_then(|c| c.retry_count)
                .unwrap_or(DEFAULT_RETRY_COUNT)
                .max(1),
            retry_backoff_secs: config
                .and_then(|c| c.retry_backoff_secs.clone())
                .unwrap_or_else(|| vec![1, 2, 4]),
            request_delay_ms: config.and_then(|c| c.request_delay_ms).unwrap_or(0),
            theater_delay: Duration::from_secs(
                args.delay
                    .or_else(|| config.and_then(|c| c.theater_delay_secs))
                    .unwrap_or(DEFAULT_THEATER_DELAY_SECS),
            ),
            render_timeout: Duration::from_secs(
                config
                    .and_then(|c| c.render_timeout_secs)
                    .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
            ),
            chrome_executable: config.and_then(|c| c.chrome_executable.clone()),
            reference_year: args.year.or_else(|| config.and_then(|c| c.reference_year)),
        }
    }

    pub fn context(&self) -> ScrapeContext {
        ScrapeContext::now().with_year(self.reference_year)
    }

    /// A fresh HTTP client and browser engine for one theater.
    pub fn page_source(&self) -> Result<Box<dyn PageSource>, FetchError> {
        let http = HttpClient::builder()
            .user_agent(self.user_agent.clone())
            .delay_ms(self.request_delay_ms)
            .timeout_secs(self.timeout_secs)
            .retry_count(self.retry_count)
            .retry_backoff_secs(self.retry_backoff_secs.clone())
            .build()?;
        let engine = ChromiumEngine::new(self.user_agent.clone())
            .with_executable(self.chrome_executable.clone());
        Ok(Box::new(Fetcher::new(
            Box::new(http),
            Box::new(engine),
            self.render_timeout,
        )))
    }
}

fn orchestrator(settings: &Settings, theaters: &[Theater]) -> Result<Orchestrator, CliRunError> {
    let store = SnapshotStore::new(&settings.output_dir)?;
    let mut orch = Orchestrator::new(store, settings.theater_delay);
    orch.register_theaters(theaters, settings.context(), || settings.page_source())?;
    Ok(orch)
}

fn display_name(key: &str) -> &str {
    match Theater::from_key(key) {
        Some(theater) => theater.display_name(),
        None => key,
    }
}

fn print_batch(results: &BatchResults, dir: &Path) {
    for (key, result) in results.iter() {
        match result {
            Some(snapshot) => println!(
                "{}: SUCCESS - movies: {}, schedules: {}",
                display_name(key),
                snapshot.data.movies.len(),
                snapshot.data.schedules.len()
            ),
            None => println!("{}: FAILED - movies: 0, schedules: 0", display_name(key)),
        }
    }
    println!("Saved to {}", dir.display());
}

fn run_all(args: &Args, settings: &Settings) -> Result<(), CliRunError> {
    let mut orch = orchestrator(settings, &Theater::ALL)?;
    let spinner = (!args.quiet).then(|| {
        let bar = indicatif::ProgressBar::new(Theater::ALL.len() as u64);
        bar.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });
    let progress_cb = |n: usize, total: usize, key: &str| {
        if let Some(bar) = &spinner {
            bar.set_position(n.saturating_sub(1) as u64);
            bar.set_message(format!("Scraping {} ({}/{})", display_name(key), n, total));
        }
    };
    let results = orch.scrape_all(Some(&progress_cb));
    if let Some(bar) = &spinner {
        bar.disable_steady_tick();
        bar.finish_and_clear();
    }
    print_batch(&results?, &settings.output_dir);
    Ok(())
}

fn run_one(key: &str, settings: &Settings) -> Result<(), CliRunError> {
    let theater = Theater::from_key(key).ok_or_else(|| {
        let available: Vec<_> = Theater::ALL.iter().map(|t| t.key()).collect();
        CliRunError::InvalidInput(format!(
            "Unknown theater '{}'. Available: {}",
            key,
            available.join(", ")
        ))
    })?;
    let mut orch = orchestrator(settings, &[theater])?;
    match orch.scrape_one(theater.key())? {
        Some(snapshot) => {
            println!(
                "{}: SUCCESS - movies: {}, schedules: {}",
                theater.display_name(),
                snapshot.data.movies.len(),
                snapshot.data.schedules.len()
            );
            println!("Saved to {}", settings.output_dir.display());
        }
        None => println!("{}: FAILED - movies: 0, schedules: 0", theater.display_name()),
    }
    Ok(())
}

fn run_test(settings: &Settings) -> Result<(), CliRunError> {
    let theater = Theater::KsCinema;
    let mut orch = orchestrator(settings, &[theater])?;
    let Some(snapshot) = orch.scrape_one(theater.key())? else {
        println!("{}: FAILED", theater.display_name());
        return Ok(());
    };
    let data = &snapshot.data;
    println!("{}: SUCCESS", data.theater_info.name);
    if let Some(address) = &data.theater_info.address {
        println!("  address: {}", address);
    }
    println!("  movies: {}", data.movies.len());
    for movie in data.movies.iter().take(3) {
        println!("    - {}", movie.title);
    }
    println!("  schedules: {}", data.schedules.len());
    for schedule in data.schedules.iter().take(3) {
        println!("    - {} ({} days)", schedule.movie_title, schedule.showtimes.len());
    }
    println!("Saved to {}", settings.output_dir.display());
    Ok(())
}

/// The newest combined snapshot in `dir`.
fn load_latest(dir: &Path) -> anyhow::Result<(PathBuf, CombinedSnapshot)> {
    let path = latest_combined_snapshot(dir)?.with_context(|| {
        format!(
            "No all_theaters_*.json in {}. Run `cinescrape all` first.",
            dir.display()
        )
    })?;
    let combined =
        load_combined(&path).with_context(|| format!("Cannot load {}", path.display()))?;
    Ok((path, combined))
}

fn print_matches(matches: &[MovieMatch], query: &str) {
    if matches.is_empty() {
        println!("No results for '{}'", query);
    }
    for (i, found) in matches.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print!("{}", found);
    }
}

fn run_query(command: &Command, settings: &Settings) -> Result<(), CliRunError> {
    let (path, combined) = load_latest(&settings.output_dir).map_err(CliRunError::Query)?;
    tracing::info!(path = %path.display(), "using snapshot");
    match command {
        Command::Digest { week_of } => {
            let today = week_of.unwrap_or_else(|| Local::now().date_naive());
            print!("{}", weekly_digest(&combined, today));
        }
        Command::Search { query, by } => {
            let matches = match by {
                SearchBy::Title => search_movie(&combined, query).into_iter().collect(),
                SearchBy::Director => search_by_director(&combined, query),
                SearchBy::Theater => theater_schedule(&combined, query),
            };
            print_matches(&matches, query);
        }
        _ => {}
    }
    Ok(())
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args, settings: &Settings) -> Result<(), CliRunError> {
    match &args.command {
        Command::All => run_all(args, settings),
        Command::Theater { key } => run_one(key, settings),
        Command::List => {
            for theater in Theater::ALL {
                println!(
                    "{:<20} {} ({})",
                    theater.key(),
                    theater.display_name(),
                    theater.base_url()
                );
            }
            Ok(())
        }
        Command::Test => run_test(settings),
        command @ (Command::Digest { .. } | Command::Search { .. }) => run_query(command, settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("cinescrape").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn parse_subcommands() {
        assert_eq!(args(&["all"]).command, Command::All);
        assert_eq!(
            args(&["theater", "eurospace"]).command,
            Command::Theater {
                key: "eurospace".into()
            }
        );
        assert_eq!(
            args(&["search", "ソラリス", "--by", "director"]).command,
            Command::Search {
                query: "ソラリス".into(),
                by: SearchBy::Director
            }
        );
        assert_eq!(
            args(&["digest", "--week-of", "2025-07-09"]).command,
            Command::Digest {
                week_of: NaiveDate::from_ymd_opt(2025, 7, 9)
            }
        );
        assert!(Args::try_parse_from(["cinescrape", "digest", "--week-of", "7/9"]).is_err());
        assert!(Args::try_parse_from(["cinescrape", "search", "x", "--by", "genre"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let a = args(&["all", "--output-dir", "snap", "--delay", "0", "--year", "2026", "--verbose"]);
        assert_eq!(a.output_dir.as_deref(), Some(Path::new("snap")));
        assert_eq!(a.delay, Some(0));
        assert_eq!(a.year, Some(2026));
        assert!(a.verbose);
    }

    #[test]
    fn parse_year_bounds() {
        assert_eq!(parse_year("2025").unwrap(), 2025);
        assert!(parse_year("25x").is_err());
        assert!(parse_year("1999").is_err());
    }

    #[test]
    fn parse_search_by_all() {
        assert_eq!(parse_search_by("title").unwrap(), SearchBy::Title);
        assert_eq!(parse_search_by("Director").unwrap(), SearchBy::Director);
        assert_eq!(parse_search_by("theatre").unwrap(), SearchBy::Theater);
        assert!(parse_search_by("cast").is_err());
    }

    #[test]
    fn defaults_without_config() {
        let s = Settings::from_sources(&args(&["all"]), None);
        assert_eq!(s.output_dir, PathBuf::from("output"));
        assert_eq!(s.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(s.timeout_secs, 30);
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.retry_backoff_secs, vec![1, 2, 4]);
        assert_eq!(s.request_delay_ms, 0);
        assert_eq!(s.theater_delay, Duration::from_secs(2));
        assert_eq!(s.render_timeout, Duration::from_secs(10));
        assert_eq!(s.reference_year, None);
    }

    #[test]
    fn flags_override_config() {
        let config: Config = toml::from_str(
            r#"
            output_dir = "from_config"
            timeout_secs = 60
            theater_delay_secs = 5
            retry_count = 0
            reference_year = 2024
        "#,
        )
        .unwrap();
        let s = Settings::from_sources(&args(&["all", "--timeout", "10"]), Some(&config));
        assert_eq!(s.output_dir, PathBuf::from("from_config"));
        assert_eq!(s.timeout_secs, 10);
        assert_eq!(s.theater_delay, Duration::from_secs(5));
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.reference_year, Some(2024));

        let s = Settings::from_sources(&args(&["all", "--year", "2026"]), Some(&config));
        assert_eq!(s.reference_year, Some(2026));
    }

    #[test]
    fn test_command_writes_to_test_output() {
        let config: Config = toml::from_str("output_dir = \"from_config\"").unwrap();
        let s = Settings::from_sources(&args(&["test"]), Some(&config));
        assert_eq!(s.output_dir, PathBuf::from("test_output"));
        let s = Settings::from_sources(&args(&["test", "--output-dir", "x"]), Some(&config));
        assert_eq!(s.output_dir, PathBuf::from("x"));
    }

    #[test]
    fn query_without_snapshot_is_exit_4() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(&["digest"]);
        let mut s = Settings::from_sources(&a, None);
        s.output_dir = dir.path().to_path_buf();
        let err = run(&a, &s).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("cinescrape all"));
    }

    #[test]
    fn unknown_theater_is_invalid_input() {
        let a = args(&["theater", "nowhere"]);
        let s = Settings::from_sources(&a, None);
        let err = run(&a, &s).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("ks_cinema"));
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Fetch(FetchError::BrowserLaunch {
                reason: "x".into()
            })
            .exit_code(),
            2
        );
        let io = SnapshotError::Io {
            path: PathBuf::from("out"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(CliRunError::from(OrchestratorError::Snapshot(io)).exit_code(), 3);
        let unknown = OrchestratorError::UnknownTheater {
            key: "x".into(),
            available: vec!["ks_cinema".into()],
        };
        assert_eq!(CliRunError::from(unknown).exit_code(), 1);
        assert_eq!(CliRunError::Query(anyhow::anyhow!("none")).exit_code(), 4);
    }
}
