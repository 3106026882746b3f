//! Error type for site scrapers. A step error means "no result for this step".

use crate::fetch::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    /// The page loaded but the structure the scraper relies on is gone.
    #[error("{theater}: {what} not found on page")]
    MissingStructure { theater: String, what: String },

    #[error("{theater}: {stage} step panicked: {reason}")]
    StepPanicked {
        theater: String,
        stage: &'static str,
        reason: String,
    },

    /// Neither the catalog nor the schedule could be retrieved.
    #[error("{theater}: nothing could be retrieved")]
    NothingRetrieved {
        theater: String,
        #[source]
        source: Box<ScraperError>,
    },
}
