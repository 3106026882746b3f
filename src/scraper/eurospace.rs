//! Eurospace (Shibuya). Rendered pages with inconsistent markup across the
//! works, current and coming listings, so several card shapes are accepted.

use super::{
    dedup_movies, element_text, movie_from_card, parse_selector, ScheduleLayout, ScrapeContext,
    ScraperError, Theater, TheaterScraper, VenueDefaults,
};
use crate::fetch::{fetch_document, FetchError, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, TheaterInfo};
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use tracing::warn;

const THEATER: Theater = Theater::Eurospace;

const VENUE: VenueDefaults = VenueDefaults {
    address: "東京都渋谷区円山町1-5 キノハウス地下2階",
    phone: "03-3461-0211",
    access: "JR渋谷駅より徒歩5分",
    screens: 2,
};

const CARD_SELECTORS: [&str; 5] = [
    "div.movie-item",
    "div.work-item",
    "article.movie",
    "div.film-info",
    "section.movie-section",
];

/// Words that mark a heading's parent as a film block.
const FILM_INDICATORS: [&str; 7] = ["監督", "出演", "分", "上映", "劇場", "作品", "映画"];

const LISTING_PATHS: [&str; 4] = ["", "/works/", "/current/", "/coming/"];
const SCHEDULE_PATHS: [&str; 2] = ["/schedule/", "/timetable/"];

const SCHEDULE: ScheduleLayout<'static> = ScheduleLayout {
    sections: &["table.schedule", "div.schedule"],
    title: &["h3", "h2", "caption"],
    days: &["tr", "div.schedule-row"],
    date: &["td.date", "div.date"],
    times: &["td.time", "span.time"],
    screen: None,
    default_screen: Some("スクリーン1"),
    require_iso_date: false,
};

pub struct EurospaceScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

impl EurospaceScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn url(path: &str) -> String {
        format!("{}{}", THEATER.base_url(), path)
    }

    /// Fetch each path; `Err` only when none of them could be fetched.
    fn fetch_all(&mut self, paths: &[&str]) -> Result<Vec<Html>, FetchError> {
        let mut docs = Vec::new();
        let mut last_err = None;
        for path in paths {
            match fetch_document(self.pages.as_mut(), &Self::url(path), FetchMode::Rendered) {
                Ok(doc) => docs.push(doc),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) if docs.is_empty() => Err(e),
            _ => Ok(docs),
        }
    }
}

/// Card elements from every known selector, or parents of headings that read
/// like film blocks when no selector matches.
fn film_elements(doc: &Html) -> Result<Vec<ElementRef<'_>>, ScraperError> {
    let mut found = Vec::new();
    for sel in CARD_SELECTORS {
        found.extend(doc.select(&parse_selector(sel)?));
    }
    if !found.is_empty() {
        return Ok(found);
    }
    let mut seen = HashSet::new();
    for heading in doc.select(&parse_selector("h2, h3")?) {
        let Some(parent) = heading.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let text = element_text(parent);
        if FILM_INDICATORS.iter().any(|w| text.contains(w)) && seen.insert(parent.id()) {
            found.push(parent);
        }
    }
    Ok(found)
}

impl TheaterScraper for EurospaceScraper {
    fn theater_name(&self) -> &str {
        THEATER.display_name()
    }

    fn base_url(&self) -> &str {
        THEATER.base_url()
    }

    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
        let mut info = TheaterInfo::new(THEATER.display_name(), THEATER.base_url());
        let doc = match fetch_document(self.pages.as_mut(), &Self::url(""), FetchMode::Rendered) {
            Ok(doc) => doc,
            Err(_) => return Ok(VENUE.info(THEATER)),
        };
        info.address = doc
            .select(&parse_selector("div.address, p")?)
            .map(element_text)
            .find(|t| t.contains("渋谷区"));
        info.phone = match doc.select(&parse_selector("a[href^='tel:']")?).next() {
            Some(a) => a
                .value()
                .attr("href")
                .map(|h| h.trim_start_matches("tel:").trim().to_string()),
            None => doc
                .select(&parse_selector("div.tel")?)
                .map(element_text)
                .find(|t| !t.is_empty()),
        };
        VENUE.fill(&mut info);
        Ok(info)
    }

    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
        let docs = self.fetch_all(&LISTING_PATHS)?;
        let mut movies = Vec::new();
        for doc in &docs {
            for el in film_elements(doc)? {
                match movie_from_card(el, THEATER.base_url()) {
                    Ok(Some(movie)) => movies.push(movie),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(theater = THEATER.key(), stage = "movies", error = %e, "skipping card")
                    }
                }
            }
        }
        Ok(dedup_movies(movies))
    }

    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
        let docs = self.fetch_all(&SCHEDULE_PATHS)?;
        let mut schedules = Vec::new();
        for doc in &docs {
            schedules.extend(SCHEDULE.extract(
                doc.root_element(),
                THEATER,
                self.ctx.reference_year,
            )?);
        }
        Ok(schedules)
    }
}
