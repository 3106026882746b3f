//! Read side over a combined snapshot: title, director and theater lookups,
//! and the two-week digest of what is showing where.

use crate::model::{MovieInfo, ShowtimeInfo, TheaterData};
use crate::snapshot::CombinedSnapshot;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

const DIGEST_DAYS: i64 = 14;
const WEEKDAYS_JA: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];

fn strip_brackets(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '「' | '」')).collect()
}

/// Loose title equality: exact, either one containing the other, or equal
/// once 「」 brackets are removed. A blank title matches nothing.
pub fn titles_match(stored: &str, query: &str) -> bool {
    if stored.trim().is_empty() || query.trim().is_empty() {
        return false;
    }
    if stored == query || stored.contains(query) || query.contains(stored) {
        return true;
    }
    let (stored, query) = (strip_brackets(stored), strip_brackets(query));
    stored == query || stored.contains(&query)
}

pub fn theater_names_match(stored: &str, query: &str) -> bool {
    if stored.trim().is_empty() || query.trim().is_empty() {
        return false;
    }
    stored.contains(query) || query.contains(stored)
}

/// A movie with every theater and showtime found for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovieMatch {
    pub movie: MovieInfo,
    pub theaters: Vec<String>,
    pub showtimes: Vec<ShowtimeInfo>,
}

fn theaters(combined: &CombinedSnapshot) -> impl Iterator<Item = &TheaterData> {
    combined.values().flatten().map(|snapshot| &snapshot.data)
}

fn schedule_info(combined: &CombinedSnapshot, title: &str) -> (Vec<String>, Vec<ShowtimeInfo>) {
    let mut names = Vec::new();
    let mut showtimes = Vec::new();
    for data in theaters(combined) {
        for schedule in &data.schedules {
            if titles_match(&schedule.movie_title, title) {
                names.push(data.theater_info.name.clone());
                showtimes.extend(schedule.showtimes.iter().cloned());
            }
        }
    }
    (names, showtimes)
}

/// First catalog entry matching `title`, with its schedules across all theaters.
pub fn search_movie(combined: &CombinedSnapshot, title: &str) -> Option<MovieMatch> {
    let movie = theaters(combined)
        .flat_map(|data| &data.movies)
        .find(|movie| titles_match(&movie.title, title))?;
    let (theaters, showtimes) = schedule_info(combined, title);
    Some(MovieMatch {
        movie: movie.clone(),
        theaters,
        showtimes,
    })
}

/// Catalog entries whose director contains `name`.
pub fn search_by_director(combined: &CombinedSnapshot, name: &str) -> Vec<MovieMatch> {
    let name = name.trim();
    if name.is_empty() {
        return Vec::new();
    }
    theaters(combined)
        .flat_map(|data| &data.movies)
        .filter(|movie| movie.director.as_deref().is_some_and(|d| d.contains(name)))
        .map(|movie| {
            let (theaters, showtimes) = schedule_info(combined, &movie.title);
            MovieMatch {
                movie: movie.clone(),
                theaters,
                showtimes,
            }
        })
        .collect()
}

/// Schedules of every theater whose name matches `name`. Schedules with no
/// catalog entry are left out.
pub fn theater_schedule(combined: &CombinedSnapshot, name: &str) -> Vec<MovieMatch> {
    let mut results = Vec::new();
    for data in theaters(combined) {
        if !theater_names_match(&data.theater_info.name, name) {
            continue;
        }
        for schedule in &data.schedules {
            let Some(movie) = data
                .movies
                .iter()
                .find(|m| titles_match(&m.title, &schedule.movie_title))
            else {
                continue;
            };
            results.push(MovieMatch {
                movie: movie.clone(),
                theaters: vec![data.theater_info.name.clone()],
                showtimes: schedule.showtimes.clone(),
            });
        }
    }
    results
}

pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn weekday_ja(date: NaiveDate) -> &'static str {
    WEEKDAYS_JA[date.weekday().num_days_from_monday() as usize]
}

fn month_day(date: NaiveDate) -> String {
    format!("{}/{}({})", date.month(), date.day(), weekday_ja(date))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyMovie {
    pub movie: MovieInfo,
    pub theaters: Vec<String>,
    /// `7/7(月)〜7/20(日)`, or a single day.
    pub period: String,
    /// `平日: 14:30, 19:00 / 土日: 10:00`
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyDigest {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub movies: Vec<WeeklyMovie>,
    pub total_theaters: usize,
}

/// Showings gathered for one title while building the digest.
struct Showings {
    movie: MovieInfo,
    theaters: Vec<String>,
    dated: Vec<(NaiveDate, Vec<String>)>,
}

impl Showings {
    fn period(&self) -> String {
        let first = self.dated.iter().map(|(d, _)| *d).min();
        let last = self.dated.iter().map(|(d, _)| *d).max();
        match (first, last) {
            (Some(first), Some(last)) if first == last => month_day(first),
            (Some(first), Some(last)) => format!("{}〜{}", month_day(first), month_day(last)),
            _ => String::new(),
        }
    }

    fn summary(&self) -> String {
        let mut weekday = BTreeSet::new();
        let mut weekend = BTreeSet::new();
        for (date, times) in &self.dated {
            let bucket = match date.weekday() {
                Weekday::Sat | Weekday::Sun => &mut weekend,
                _ => &mut weekday,
            };
            bucket.extend(times.iter().map(String::as_str));
        }
        let mut parts = Vec::new();
        if !weekday.is_empty() {
            parts.push(format!("平日: {}", weekday.into_iter().collect::<Vec<_>>().join(", ")));
        }
        if !weekend.is_empty() {
            parts.push(format!("土日: {}", weekend.into_iter().collect::<Vec<_>>().join(", ")));
        }
        parts.join(" / ")
    }
}

/// Movies showing from Monday of `today`'s week through the following
/// Sunday. Schedules whose titles match loosely are merged into the entry
/// seen first.
pub fn weekly_digest(combined: &CombinedSnapshot, today: NaiveDate) -> WeeklyDigest {
    let week_start = monday_of(today);
    let window_end = week_start + Duration::days(DIGEST_DAYS);
    let mut showings: Vec<(String, Showings)> = Vec::new();

    for data in theaters(combined) {
        let theater = &data.theater_info.name;
        for schedule in &data.schedules {
            let dated: Vec<(NaiveDate, Vec<String>)> = schedule
                .showtimes
                .iter()
                .filter_map(|s| {
                    let date = NaiveDate::parse_from_str(&s.date, "%Y-%m-%d").ok()?;
                    (week_start <= date && date < window_end).then(|| (date, s.times.clone()))
                })
                .collect();
            if dated.is_empty() {
                continue;
            }
            let title = &schedule.movie_title;
            match showings.iter_mut().find(|(t, _)| titles_match(t, title)) {
                Some((_, entry)) => {
                    if !entry.theaters.contains(theater) {
                        entry.theaters.push(theater.clone());
                    }
                    entry.dated.extend(dated);
                }
                None => {
                    let movie = data
                        .movies
                        .iter()
                        .find(|m| titles_match(&m.title, title))
                        .cloned()
                        .unwrap_or_else(|| MovieInfo::titled(title.clone()));
                    showings.push((
                        title.clone(),
                        Showings {
                            movie,
                            theaters: vec![theater.clone()],
                            dated,
                        },
                    ));
                }
            }
        }
    }

    let total_theaters = showings
        .iter()
        .flat_map(|(_, s)| &s.theaters)
        .collect::<BTreeSet<_>>()
        .len();
    let movies = showings
        .into_iter()
        .map(|(_, s)| WeeklyMovie {
            period: s.period(),
            summary: s.summary(),
            movie: s.movie,
            theaters: s.theaters,
        })
        .collect();
    WeeklyDigest {
        week_start,
        week_end: window_end - Duration::days(1),
        movies,
        total_theaters,
    }
}

impl fmt::Display for WeeklyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "今週・来週の上映映画 {}〜{} ({} movies, {} theaters)",
            self.week_start.format("%m/%d"),
            self.week_end.format("%m/%d"),
            self.movies.len(),
            self.total_theaters
        )?;
        for entry in &self.movies {
            writeln!(f)?;
            writeln!(f, "{}", entry.movie.title)?;
            writeln!(f, "  {}", entry.theaters.join(", "))?;
            writeln!(f, "  {}", entry.period)?;
            if !entry.summary.is_empty() {
                writeln!(f, "  {}", entry.summary)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for MovieMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.movie.title)?;
        if let Some(director) = &self.movie.director {
            writeln!(f, "  監督: {}", director)?;
        }
        if let Some(minutes) = self.movie.duration {
            writeln!(f, "  上映時間: {}分", minutes)?;
        }
        if !self.theaters.is_empty() {
            writeln!(f, "  劇場: {}", self.theaters.join(", "))?;
        }
        for showtime in &self.showtimes {
            write!(f, "  {} {}", showtime.date, showtime.times.join(", "))?;
            match &showtime.screen {
                Some(screen) => writeln!(f, " ({})", screen)?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}
