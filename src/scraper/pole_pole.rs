//! Pole Pole Higashi-Nakano. The site is a client-rendered app, so every page
//! goes through the browser.

use super::{
    dedup_movies, element_text, first_matching, movie_from_card, parse_selector, ScheduleLayout,
    ScrapeContext, ScraperError, Theater, TheaterScraper, VenueDefaults,
};
use crate::fetch::{fetch_document, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, TheaterInfo};
use scraper::Html;
use tracing::warn;

const THEATER: Theater = Theater::PolePole;

const VENUE: VenueDefaults = VenueDefaults {
    address: "東京都中野区東中野4-4-1 ポレポレ坐ビル地下",
    phone: "03-3371-0088",
    access: "JR中央線・総武線・都営大江戸線東中野駅より徒歩1分",
    screens: 2,
};

const SCHEDULE: ScheduleLayout<'static> = ScheduleLayout {
    sections: &["div.schedule-item", "section.movie-schedule"],
    title: &["h3", "h2", "div.movie-title"],
    days: &["div.date-schedule", "div.schedule-day"],
    date: &["div.date", "h4"],
    times: &["span.time", "div.showtime"],
    screen: Some("span.screen"),
    default_screen: Some("スクリーン1"),
    require_iso_date: false,
};

pub struct PolePoleScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

impl PolePoleScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn url(path: &str) -> String {
        format!("{}{}", THEATER.base_url(), path)
    }

    fn cards(doc: &Html, containers: &[&str], cards: &[&str]) -> Result<Vec<MovieInfo>, ScraperError> {
        let scopes = if containers.is_empty() {
            vec![doc.root_element()]
        } else {
            first_matching(doc.root_element(), containers)?
        };
        let mut movies = Vec::new();
        for scope in scopes {
            for card in first_matching(scope, cards)? {
                match movie_from_card(card, THEATER.base_url()) {
                    Ok(Some(movie)) => movies.push(movie),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(theater = THEATER.key(), stage = "movies", error = %e, "skipping card")
                    }
                }
            }
        }
        Ok(movies)
    }
}

impl TheaterScraper for PolePoleScraper {
    fn theater_name(&self) -> &str {
        THEATER.display_name()
    }

    fn base_url(&self) -> &str {
        THEATER.base_url()
    }

    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
        let mut info = TheaterInfo::new(THEATER.display_name(), THEATER.base_url());
        match fetch_document(self.pages.as_mut(), &Self::url("/access"), FetchMode::Rendered) {
            Ok(doc) => {
                if let Some(el) = doc.select(&parse_selector("div.address")?).next() {
                    info.address = Some(element_text(el)).filter(|s| !s.is_empty());
                }
            }
            Err(e) => warn!(theater = THEATER.key(), error = %e, "access page unavailable"),
        }
        VENUE.fill(&mut info);
        Ok(info)
    }

    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
        let mut movies = Vec::new();
        let mut fetched = false;
        let mut last_err = None;

        match fetch_document(self.pages.as_mut(), &Self::url(""), FetchMode::Rendered) {
            Ok(doc) => {
                fetched = true;
                movies.extend(Self::cards(
                    &doc,
                    &["section.current-movies", "div.movies-current"],
                    &["div.movie-item", "article"],
                )?);
            }
            Err(e) => last_err = Some(e),
        }
        match fetch_document(self.pages.as_mut(), &Self::url("/works"), FetchMode::Rendered) {
            Ok(doc) => {
                fetched = true;
                movies.extend(Self::cards(&doc, &[], &["div.work-card", "div.movie-card"])?);
            }
            Err(e) => last_err = Some(e),
        }

        match last_err {
            Some(e) if !fetched => Err(e.into()),
            _ => Ok(dedup_movies(movies)),
        }
    }

    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
        let doc = fetch_document(self.pages.as_mut(), &Self::url("/schedule"), FetchMode::Rendered)?;
        SCHEDULE.extract(doc.root_element(), THEATER, self.ctx.reference_year)
    }
}
