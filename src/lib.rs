//! cinescrape: showtime scraper for Tokyo independent theaters, writing JSON snapshots.

pub mod cli;
pub mod config;
pub mod digest;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod scraper;
pub mod snapshot;

// Re-exports for CLI and consumers.
pub use fetch::{FetchError, FetchMode, Fetcher, HttpClient, HttpClientBuilder, PageSource};
pub use model::{MovieInfo, MovieSchedule, ShowtimeInfo, TheaterData, TheaterInfo, TheaterSnapshot};
pub use orchestrator::{BatchResults, Orchestrator, OrchestratorError, TheaterSummary};
pub use scraper::{build_scraper, ScrapeContext, ScraperError, Theater, TheaterScraper};
pub use snapshot::{SnapshotError, SnapshotStore};
