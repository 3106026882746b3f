//! Scrape orchestration: a registry of scrapers keyed by theater key, run one
//! at a time with a pause between theaters, results persisted as snapshots.

use crate::fetch::{FetchError, PageSource};
use crate::model::TheaterSnapshot;
use crate::scraper::{build_scraper, panic_reason, ScrapeContext, Theater, TheaterScraper};
use crate::snapshot::{SnapshotError, SnapshotStore};
use chrono::{Local, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown theater '{key}'. Available: {}", available.join(", "))]
    UnknownTheater { key: String, available: Vec<String> },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Per-theater line of the summary report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TheaterSummary {
    pub theater_name: String,
    pub total_movies: usize,
    pub total_schedules: usize,
    pub success: bool,
}

/// `(key, value)` pairs serialized as a JSON object in registry order.
struct KeyedMap<'a, T>(&'a [(String, T)]);

impl<T: Serialize> Serialize for KeyedMap<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

/// Results of a batch: one entry per registered theater, `None` for failures.
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    entries: Vec<(String, Option<TheaterSnapshot>)>,
    /// Files written for this batch.
    pub written: Vec<PathBuf>,
}

impl BatchResults {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Option<TheaterSnapshot>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&TheaterSnapshot>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn summary(&self) -> Vec<(String, TheaterSummary)> {
        self.entries
            .iter()
            .map(|(key, result)| {
                let line = match result {
                    Some(snapshot) => TheaterSummary {
                        theater_name: snapshot.data.theater_info.name.clone(),
                        total_movies: snapshot.data.movies.len(),
                        total_schedules: snapshot.data.schedules.len(),
                        success: true,
                    },
                    None => TheaterSummary {
                        theater_name: key.clone(),
                        total_movies: 0,
                        total_schedules: 0,
                        success: false,
                    },
                };
                (key.clone(), line)
            })
            .collect()
    }
}

impl Serialize for BatchResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        KeyedMap(&self.entries).serialize(serializer)
    }
}

/// Progress hook: (index starting at 1, total, theater key).
pub type Progress<'a> = &'a dyn Fn(usize, usize, &str);

/// Owns the scraper registry and the snapshot store.
pub struct Orchestrator {
    scrapers: Vec<(String, Box<dyn TheaterScraper>)>,
    store: SnapshotStore,
    theater_delay: Duration,
}

impl Orchestrator {
    pub fn new(store: SnapshotStore, theater_delay: Duration) -> Self {
        Self {
            scrapers: Vec::new(),
            store,
            theater_delay,
        }
    }

    /// Register (or replace) the scraper for `key`. Registration order is run order.
    pub fn register(&mut self, key: impl Into<String>, scraper: Box<dyn TheaterScraper>) {
        let key = key.into();
        match self.scrapers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = scraper,
            None => self.scrapers.push((key, scraper)),
        }
    }

    /// Register every theater in `theaters`, each with its own page source.
    pub fn register_theaters(
        &mut self,
        theaters: &[Theater],
        ctx: ScrapeContext,
        mut pages: impl FnMut() -> Result<Box<dyn PageSource>, FetchError>,
    ) -> Result<(), FetchError> {
        for &theater in theaters {
            self.register(theater.key(), build_scraper(theater, pages()?, ctx));
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.scrapers.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run one scraper, turning errors and panics into `None`.
    fn run(key: &str, scraper: &mut dyn TheaterScraper) -> Option<TheaterSnapshot> {
        info!(theater = key, "scraping");
        match panic::catch_unwind(AssertUnwindSafe(|| scraper.try_scrape_all())) {
            Ok(Ok(data)) => {
                info!(
                    theater = key,
                    movies = data.movies.len(),
                    schedules = data.schedules.len(),
                    "scraped"
                );
                Some(TheaterSnapshot::new(data, now()))
            }
            Ok(Err(e)) => {
                error!(theater = key, error = %e, "scrape failed");
                None
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(theater = key, reason = %reason, "scraper panicked");
                None
            }
        }
    }

    /// Scrape one theater and write its snapshot file if it produced data.
    pub fn scrape_one(&mut self, key: &str) -> Result<Option<TheaterSnapshot>, OrchestratorError> {
        let available: Vec<String> = self.keys().iter().map(|k| k.to_string()).collect();
        let (_, scraper) = self
            .scrapers
            .iter_mut()
            .find(|(k, _)| k == key)
            .ok_or_else(|| OrchestratorError::UnknownTheater {
                key: key.to_string(),
                available,
            })?;
        let result = Self::run(key, scraper.as_mut());
        if let Some(snapshot) = &result {
            self.store.write_theater(key, snapshot, now())?;
        }
        Ok(result)
    }

    /// Scrape every registered theater in order, then write per-theater files,
    /// the combined file, and the summary report.
    ///
    /// Individual theater failures never stop the batch; only a snapshot
    /// write failure is returned as an error.
    pub fn scrape_all(
        &mut self,
        progress: Option<Progress<'_>>,
    ) -> Result<BatchResults, OrchestratorError> {
        let total = self.scrapers.len();
        let mut results = BatchResults::default();
        for (i, (key, scraper)) in self.scrapers.iter_mut().enumerate() {
            if i > 0 && !self.theater_delay.is_zero() {
                std::thread::sleep(self.theater_delay);
            }
            if let Some(progress) = progress {
                progress(i + 1, total, key);
            }
            let result = Self::run(key, scraper.as_mut());
            results.entries.push((key.clone(), result));
        }

        let stamp = now();
        for (key, result) in &results.entries {
            if let Some(snapshot) = result {
                let path = self.store.write_theater(key, snapshot, stamp)?;
                results.written.push(path);
            }
        }
        let combined = self.store.write_combined(&results, stamp)?;
        let summary = results.summary();
        let report = self.store.write_summary(&KeyedMap(&summary), stamp)?;
        results.written.extend([combined, report]);

        let succeeded = results.iter().filter(|(_, r)| r.is_some()).count();
        info!(succeeded, total, "batch finished");
        Ok(results)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
