//! Theater site scrapers. The scraper trait, the theater catalog, scraper
//! construction, and DOM helpers shared by the six site adapters.

mod error;
pub mod text;

pub mod eurospace;
pub mod ks_cinema;
pub mod pole_pole;
pub mod shimotakaido;
pub mod shinjuku_musashino;
pub mod waseda_shochiku;

pub use error::ScraperError;

use crate::fetch::PageSource;
use crate::model::{MovieInfo, MovieSchedule, ShowtimeInfo, TheaterData, TheaterInfo};
use crate::normalize::{
    absolute_url, clean_text, extract_times, labelled_value, non_empty, parse_duration_minutes,
    split_names, try_parse_date,
};
use chrono::{Datelike, Local, NaiveDate};
use scraper::{ElementRef, Html, Node, Selector};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Per-run facts every scraper needs: the local date and the year stamped
/// onto dates that omit one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeContext {
    pub today: NaiveDate,
    pub reference_year: i32,
}

impl ScrapeContext {
    pub fn new(today: NaiveDate, reference_year: i32) -> Self {
        Self {
            today,
            reference_year,
        }
    }

    /// Today from the local clock; reference year is the current year.
    pub fn now() -> Self {
        let today = Local::now().date_naive();
        Self::new(today, today.year())
    }

    pub fn with_year(mut self, year: Option<i32>) -> Self {
        if let Some(year) = year {
            self.reference_year = year;
        }
        self
    }
}

/// Contract implemented by each theater site adapter.
///
/// The three steps are independent: an error from one step means "no result
/// for that step" and never stops the others.
pub trait TheaterScraper {
    fn theater_name(&self) -> &str;
    fn base_url(&self) -> &str;

    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError>;
    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError>;
    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError>;

    /// Run the three steps and assemble the aggregate.
    ///
    /// Fails only when both the catalog and the schedule step failed, which
    /// is how an unreachable site shows up.
    fn try_scrape_all(&mut self) -> Result<TheaterData, ScraperError> {
        let name = self.theater_name().to_string();
        let url = self.base_url().to_string();
        let steps = (
            guarded_step(&name, "theater_info", || self.theater_info()),
            guarded_step(&name, "movies", || self.movies()),
            guarded_step(&name, "schedules", || self.schedules()),
        );
        let (info, movies, schedules) = match steps {
            (_, Err(_), Err(e)) => {
                return Err(ScraperError::NothingRetrieved {
                    theater: name,
                    source: Box::new(e),
                })
            }
            steps => steps,
        };
        let info = or_step_default(&name, "theater_info", info, || {
            TheaterInfo::new(name.clone(), url.clone())
        });
        let movies = or_step_default(&name, "movies", movies, Vec::new);
        let schedules = or_step_default(&name, "schedules", schedules, Vec::new);
        debug!(
            theater = %name,
            movies = movies.len(),
            schedules = schedules.len(),
            "scrape finished"
        );
        Ok(TheaterData::new(info, movies, schedules))
    }

    /// Like [`try_scrape_all`](Self::try_scrape_all) but never fails: when
    /// nothing could be retrieved the result is name and URL only.
    fn scrape_all(&mut self) -> TheaterData {
        match self.try_scrape_all() {
            Ok(data) => data,
            Err(e) => {
                warn!(theater = %self.theater_name(), error = %e, "scrape produced no data");
                TheaterData::new(
                    TheaterInfo::new(self.theater_name(), self.base_url()),
                    Vec::new(),
                    Vec::new(),
                )
            }
        }
    }
}

/// Run one step, turning a panic inside it into a step error.
fn guarded_step<T>(
    theater: &str,
    stage: &'static str,
    step: impl FnOnce() -> Result<T, ScraperError>,
) -> Result<T, ScraperError> {
    panic::catch_unwind(AssertUnwindSafe(step)).unwrap_or_else(|payload| {
        Err(ScraperError::StepPanicked {
            theater: theater.to_string(),
            stage,
            reason: panic_reason(payload.as_ref()),
        })
    })
}

/// Message carried by a panic payload, when it has one.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn or_step_default<T>(
    theater: &str,
    stage: &str,
    step: Result<T, ScraperError>,
    default: impl FnOnce() -> T,
) -> T {
    step.unwrap_or_else(|e| {
        warn!(theater, stage, error = %e, "step failed, using empty result");
        default()
    })
}

/// The supported theaters, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Theater {
    KsCinema,
    PolePole,
    Eurospace,
    Shimotakaido,
    WasedaShochiku,
    ShinjukuMusashino,
}

impl Theater {
    pub const ALL: [Theater; 6] = [
        Theater::KsCinema,
        Theater::PolePole,
        Theater::Eurospace,
        Theater::Shimotakaido,
        Theater::WasedaShochiku,
        Theater::ShinjukuMusashino,
    ];

    /// Stable key used on the command line and in snapshot file names.
    pub fn key(self) -> &'static str {
        match self {
            Theater::KsCinema => "ks_cinema",
            Theater::PolePole => "pole_pole",
            Theater::Eurospace => "eurospace",
            Theater::Shimotakaido => "shimotakaido",
            Theater::WasedaShochiku => "waseda_shochiku",
            Theater::ShinjukuMusashino => "shinjuku_musashino",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Theater::KsCinema => "ケイズシネマ",
            Theater::PolePole => "ポレポレ東中野",
            Theater::Eurospace => "ユーロスペース",
            Theater::Shimotakaido => "下高井戸シネマ",
            Theater::WasedaShochiku => "早稲田松竹",
            Theater::ShinjukuMusashino => "新宿武蔵野館",
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Theater::KsCinema => "https://www.ks-cinema.com",
            Theater::PolePole => "https://pole2.co.jp",
            Theater::Eurospace => "https://www.eurospace.co.jp",
            Theater::Shimotakaido => "http://shimotakaidocinema.com",
            Theater::WasedaShochiku => "http://wasedashochiku.co.jp",
            Theater::ShinjukuMusashino => "https://shinjuku.musashino-k.jp",
        }
    }

    pub fn from_key(key: &str) -> Option<Theater> {
        Theater::ALL.into_iter().find(|t| t.key() == key)
    }
}

/// Build the adapter for `theater` on top of the given page source.
pub fn build_scraper(
    theater: Theater,
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
) -> Box<dyn TheaterScraper> {
    match theater {
        Theater::KsCinema => Box::new(ks_cinema::KsCinemaScraper::new(pages, ctx)),
        Theater::PolePole => Box::new(pole_pole::PolePoleScraper::new(pages, ctx)),
        Theater::Eurospace => Box::new(eurospace::EurospaceScraper::new(pages, ctx)),
        Theater::Shimotakaido => Box::new(shimotakaido::ShimotakaidoScraper::new(pages, ctx)),
        Theater::WasedaShochiku => {
            Box::new(waseda_shochiku::WasedaShochikuScraper::new(pages, ctx))
        }
        Theater::ShinjukuMusashino => Box::new(
            shinjuku_musashino::ShinjukuMusashinoScraper::new(pages, ctx),
        ),
    }
}

/// Venue facts a site does not publish in scrapeable form.
pub(crate) struct VenueDefaults {
    pub address: &'static str,
    pub phone: &'static str,
    pub access: &'static str,
    pub screens: u32,
}

impl VenueDefaults {
    /// Fill the fields the page left empty.
    pub(crate) fn fill(&self, info: &mut TheaterInfo) {
        info.address.get_or_insert_with(|| self.address.to_string());
        info.phone.get_or_insert_with(|| self.phone.to_string());
        info.access.get_or_insert_with(|| self.access.to_string());
        info.screens.get_or_insert(self.screens);
    }

    pub(crate) fn info(&self, theater: Theater) -> TheaterInfo {
        let mut info = TheaterInfo::new(theater.display_name(), theater.base_url());
        self.fill(&mut info);
        info
    }
}

pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::Selector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

/// Whitespace-collapsed text of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first match of `sel` under `el`, if non-empty.
pub(crate) fn select_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel).map(element_text).find(|t| !t.is_empty())
}

/// Text of the first element matched by any of `selectors`, tried in order.
pub(crate) fn first_text(el: ElementRef<'_>, selectors: &[&str]) -> Result<Option<String>, ScraperError> {
    for sel in selectors {
        if let Some(text) = select_text(el, &parse_selector(sel)?) {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Matches of the first selector in `selectors` that finds anything under `el`.
pub(crate) fn first_matching<'a>(
    el: ElementRef<'a>,
    selectors: &[&str],
) -> Result<Vec<ElementRef<'a>>, ScraperError> {
    for sel in selectors {
        let found: Vec<_> = el.select(&parse_selector(sel)?).collect();
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// Non-empty text lines under `el`, one per text node, skipping script and style.
pub(crate) fn element_lines(el: ElementRef<'_>) -> Vec<String> {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?;
            if let Node::Element(parent) = parent.value() {
                if matches!(parent.name(), "script" | "style" | "noscript") {
                    return None;
                }
            }
            non_empty(text)
        })
        .collect()
}

/// Visible text lines of the whole document.
pub(crate) fn page_lines(doc: &Html) -> Vec<String> {
    element_lines(doc.root_element())
}

/// A labelled field: a dedicated element (label prefix stripped) or, failing
/// that, a "label：value" line anywhere in the card.
fn card_field(
    card: ElementRef<'_>,
    body: &str,
    selectors: &[&str],
    labels: &[&str],
) -> Result<Option<String>, ScraperError> {
    Ok(match first_text(card, selectors)? {
        Some(text) => Some(labelled_value(&text, labels).unwrap_or(text)),
        None => labelled_value(body, labels),
    })
}

/// Metadata from a movie card: heading title, class-marked or labelled
/// staff fields, running time, synopsis, first image as poster.
pub(crate) fn movie_from_card(
    card: ElementRef<'_>,
    base_url: &str,
) -> Result<Option<MovieInfo>, ScraperError> {
    let Some(title) = first_text(
        card,
        &["h2", "h3", "h4", ".title", ".movie-title", ".work-title"],
    )?
    else {
        return Ok(None);
    };
    let body = element_lines(card).join("\n");
    let mut movie = MovieInfo::titled(title);
    movie.title_en = first_text(card, &[".title-en", ".en-title", ".original-title"])?;
    movie.director = card_field(card, &body, &[".director"], &["監督", "Director"])?;
    movie.cast = card_field(card, &body, &[".cast"], &["出演", "キャスト", "Cast"])?
        .map(|c| split_names(&c))
        .unwrap_or_default();
    movie.genre = card_field(card, &body, &[".genre"], &["ジャンル", "Genre"])?;
    movie.rating = card_field(card, &body, &[".rating"], &["レイティング", "区分"])?;
    movie.duration = first_text(card, &[".duration", ".runtime"])?
        .and_then(|d| parse_duration_minutes(&d))
        .or_else(|| parse_duration_minutes(&body));
    movie.synopsis = match first_text(card, &[".synopsis", ".description"])? {
        Some(text) => Some(text),
        None => {
            let paragraph = parse_selector("p")?;
            card.select(&paragraph)
                .map(element_text)
                .find(|p| p.chars().count() >= 60 && !p.contains('：'))
        }
    };
    let image = parse_selector("img")?;
    movie.poster_url = card
        .select(&image)
        .find_map(|img| img.value().attr("src"))
        .and_then(|src| absolute_url(base_url, src));
    Ok(Some(movie))
}

/// Where a site keeps its per-film schedule blocks.
pub(crate) struct ScheduleLayout<'a> {
    /// One element per film.
    pub sections: &'a [&'a str],
    pub title: &'a [&'a str],
    /// One element per screening day inside a section.
    pub days: &'a [&'a str],
    pub date: &'a [&'a str],
    /// Elements holding one time each. When none match, times are read
    /// from the whole day element's text.
    pub times: &'a [&'a str],
    pub screen: Option<&'a str>,
    pub default_screen: Option<&'a str>,
    /// Drop days whose date does not normalize instead of keeping the raw text.
    pub require_iso_date: bool,
}

impl ScheduleLayout<'_> {
    /// Schedules from every section. A malformed section or day is skipped.
    pub(crate) fn extract(
        &self,
        root: ElementRef<'_>,
        theater: Theater,
        reference_year: i32,
    ) -> Result<Vec<MovieSchedule>, ScraperError> {
        let mut schedules = Vec::new();
        for section in first_matching(root, self.sections)? {
            let Some(title) = first_text(section, self.title)? else {
                warn!(theater = theater.key(), stage = "schedules", "schedule block without title");
                continue;
            };
            let mut showtimes = Vec::new();
            for day in first_matching(section, self.days)? {
                if let Some(showtime) = self.showtime(day, reference_year)? {
                    showtimes.push(showtime);
                }
            }
            if !showtimes.is_empty() {
                schedules.push(MovieSchedule {
                    theater_name: theater.display_name().to_string(),
                    movie_title: title,
                    showtimes,
                });
            }
        }
        Ok(schedules)
    }

    fn showtime(
        &self,
        day: ElementRef<'_>,
        reference_year: i32,
    ) -> Result<Option<ShowtimeInfo>, ScraperError> {
        let Some(date_text) = first_text(day, self.date)? else {
            return Ok(None);
        };
        let date = match try_parse_date(&date_text, reference_year) {
            Some(date) => date,
            None if self.require_iso_date => return Ok(None),
            None => date_text.clone(),
        };
        let time_elements = first_matching(day, self.times)?;
        let mut times: Vec<String> = if time_elements.is_empty() {
            let text = element_text(day);
            extract_times(text.strip_prefix(date_text.as_str()).unwrap_or(&text))
        } else {
            time_elements
                .into_iter()
                .flat_map(|el| extract_times(&element_text(el)))
                .collect()
        };
        times.dedup();
        if times.is_empty() {
            return Ok(None);
        }
        let mut showtime = ShowtimeInfo::new(date, times);
        let screen = match self.screen {
            Some(sel) => first_text(day, &[sel])?,
            None => None,
        };
        showtime.screen = screen.or_else(|| self.default_screen.map(str::to_string));
        Ok(Some(showtime))
    }
}

/// Drop later movies whose title repeats an earlier one.
pub(crate) fn dedup_movies(movies: Vec<MovieInfo>) -> Vec<MovieInfo> {
    let mut seen = std::collections::HashSet::new();
    movies
        .into_iter()
        .filter(|m| seen.insert(m.title.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetch::{FetchError, FetchMode};
    use std::collections::HashMap;

    /// In-memory page source keyed by URL. Unknown URLs fail like a 404.
    #[derive(Default)]
    pub(crate) struct FixturePages {
        pages: HashMap<String, String>,
        pub requests: Vec<(String, FetchMode)>,
    }

    impl FixturePages {
        pub fn with(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl PageSource for FixturePages {
        fn fetch_html(&mut self, url: &str, mode: FetchMode) -> Result<String, FetchError> {
            self.requests.push((url.to_string(), mode));
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
        }
    }

    pub(crate) fn ctx(year: i32) -> ScrapeContext {
        let today = NaiveDate::from_ymd_opt(year, 7, 5).expect("valid test date");
        ScrapeContext::new(today, year)
    }

    #[test]
    fn theater_keys_round_trip_and_keep_order() {
        let keys: Vec<_> = Theater::ALL.iter().map(|t| t.key()).collect();
        assert_eq!(
            keys,
            [
                "ks_cinema",
                "pole_pole",
                "eurospace",
                "shimotakaido",
                "waseda_shochiku",
                "shinjuku_musashino"
            ]
        );
        for theater in Theater::ALL {
            assert_eq!(Theater::from_key(theater.key()), Some(theater));
        }
        assert_eq!(Theater::from_key("nope"), None);
    }

    #[test]
    fn every_scraper_survives_an_unreachable_site() {
        for theater in Theater::ALL {
            let mut scraper = build_scraper(theater, Box::new(FixturePages::default()), ctx(2025));
            assert_eq!(scraper.theater_name(), theater.display_name());
            let data = scraper.scrape_all();
            assert_eq!(data.theater_info.name, theater.display_name());
            assert!(data.movies.is_empty());
            assert!(data.schedules.is_empty());
            assert!(matches!(
                scraper.try_scrape_all(),
                Err(ScraperError::NothingRetrieved { .. })
            ));
        }
    }

    struct PanickySchedule;

    impl TheaterScraper for PanickySchedule {
        fn theater_name(&self) -> &str {
            "panicky"
        }
        fn base_url(&self) -> &str {
            "https://panicky.example"
        }
        fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
            Ok(TheaterInfo::new("panicky", "https://panicky.example"))
        }
        fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
            Ok(vec![MovieInfo::titled("Test Film")])
        }
        fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
            panic!("schedule table changed")
        }
    }

    #[test]
    fn step_panic_becomes_empty_step() -> Result<(), ScraperError> {
        let mut scraper = PanickySchedule;
        let data = scraper.try_scrape_all()?;
        assert_eq!(data.theater_info.name, "panicky");
        assert_eq!(data.movies.len(), 1);
        assert!(data.schedules.is_empty());
        assert_eq!(scraper.scrape_all().movies.len(), 1);

        let step = guarded_step("panicky", "schedules", || scraper.schedules());
        match step {
            Err(ScraperError::StepPanicked { stage, reason, .. }) => {
                assert_eq!(stage, "schedules");
                assert_eq!(reason, "schedule table changed");
            }
            other => panic!("expected a panicked step, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn element_lines_skip_scripts() -> Result<(), ScraperError> {
        let doc = Html::parse_document(
            "<html><body><h2> A  film </h2><script>var x = 1;</script><p>7/5 <b>10:40</b></p></body></html>",
        );
        assert_eq!(page_lines(&doc), vec!["A film", "7/5", "10:40"]);
        let sel = parse_selector("p")?;
        let p = doc.select(&sel).next().ok_or(ScraperError::MissingStructure {
            theater: "test".into(),
            what: "p".into(),
        })?;
        assert_eq!(element_text(p), "7/5 10:40");
        Ok(())
    }

    #[test]
    fn card_metadata() -> Result<(), ScraperError> {
        let doc = Html::parse_fragment(
            r#"<div class="card"><img src="/img/p.jpg"><h3>ロボット・ドリームズ</h3>
               <p>監督：パブロ・ベルヘル</p><p>出演：A、B</p><p>2023年／102分／G</p></div>"#,
        );
        let sel = parse_selector("div.card")?;
        let card = doc.select(&sel).next().ok_or(ScraperError::MissingStructure {
            theater: "test".into(),
            what: "card".into(),
        })?;
        let movie = movie_from_card(card, "https://shinjuku.musashino-k.jp")?.ok_or(
            ScraperError::MissingStructure {
                theater: "test".into(),
                what: "title".into(),
            },
        )?;
        assert_eq!(movie.title, "ロボット・ドリームズ");
        assert_eq!(movie.director.as_deref(), Some("パブロ・ベルヘル"));
        assert_eq!(movie.cast, vec!["A", "B"]);
        assert_eq!(movie.duration, Some(102));
        assert_eq!(
            movie.poster_url.as_deref(),
            Some("https://shinjuku.musashino-k.jp/img/p.jpg")
        );
        Ok(())
    }
}
