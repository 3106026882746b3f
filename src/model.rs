//! Shared data model for scraped theater data.
//!
//! Every site scraper produces these entities; the snapshot writer and the
//! digest/query side consume them. Field names are the snapshot JSON keys.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Identity and venue facts for one theater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TheaterInfo {
    pub name: String,
    pub url: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub access: Option<String>,
    pub screens: Option<u32>,
}

impl TheaterInfo {
    /// Info with only name and URL known.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            address: None,
            phone: None,
            access: None,
            screens: None,
        }
    }
}

/// One film's metadata. Everything but `title` may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieInfo {
    pub title: String,
    pub title_en: Option<String>,
    pub director: Option<String>,
    /// Cast in billing order.
    #[serde(default)]
    pub cast: Vec<String>,
    pub genre: Option<String>,
    /// Running time in minutes.
    pub duration: Option<u32>,
    pub rating: Option<String>,
    pub synopsis: Option<String>,
    pub poster_url: Option<String>,
}

impl MovieInfo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            title_en: None,
            director: None,
            cast: Vec::new(),
            genre: None,
            duration: None,
            rating: None,
            synopsis: None,
            poster_url: None,
        }
    }
}

/// One screening date with its start times in programming order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowtimeInfo {
    /// `YYYY-MM-DD` when the source date could be normalized; the raw text otherwise.
    pub date: String,
    /// `HH:MM` local theater time.
    #[serde(default)]
    pub times: Vec<String>,
    pub screen: Option<String>,
    pub ticket_url: Option<String>,
}

impl ShowtimeInfo {
    pub fn new(date: impl Into<String>, times: Vec<String>) -> Self {
        Self {
            date: date.into(),
            times,
            screen: None,
            ticket_url: None,
        }
    }

    pub fn on_screen(mut self, screen: impl Into<String>) -> Self {
        self.screen = Some(screen.into());
        self
    }
}

/// One movie's showtimes at one theater.
///
/// `movie_title` is the string as scraped from the schedule page; it is not a
/// foreign key into the catalog and may differ slightly from `MovieInfo::title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieSchedule {
    pub theater_name: String,
    pub movie_title: String,
    #[serde(default)]
    pub showtimes: Vec<ShowtimeInfo>,
}

/// Everything one scraper run produced for one theater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TheaterData {
    pub theater_info: TheaterInfo,
    #[serde(default)]
    pub movies: Vec<MovieInfo>,
    #[serde(default)]
    pub schedules: Vec<MovieSchedule>,
}

impl TheaterData {
    /// Assemble the aggregate. Every schedule is bound to `theater_info.name`.
    pub fn new(
        theater_info: TheaterInfo,
        movies: Vec<MovieInfo>,
        mut schedules: Vec<MovieSchedule>,
    ) -> Self {
        for schedule in &mut schedules {
            if schedule.theater_name != theater_info.name {
                schedule.theater_name = theater_info.name.clone();
            }
        }
        Self {
            theater_info,
            movies,
            schedules,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty() && self.schedules.is_empty()
    }
}

/// A `TheaterData` stamped with the time it was scraped; the per-theater snapshot shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TheaterSnapshot {
    #[serde(flatten)]
    pub data: TheaterData,
    pub scraped_at: NaiveDateTime,
}

impl TheaterSnapshot {
    pub fn new(data: TheaterData, scraped_at: NaiveDateTime) -> Self {
        Self { data, scraped_at }
    }
}
