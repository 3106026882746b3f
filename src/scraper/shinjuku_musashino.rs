//! Shinjuku Musashino-kan. Static pages, falling back to the browser when the
//! plain fetch is refused. Titles are `h4` headings mixed in with news items.

use super::text::{candidate_titles, merge_known_titles, TitleFilter};
use super::{
    element_text, page_lines, parse_selector, ScheduleLayout, ScrapeContext, ScraperError,
    Theater, TheaterScraper, VenueDefaults,
};
use crate::fetch::{fetch_document, FetchError, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, TheaterInfo};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::debug;

const THEATER: Theater = Theater::ShinjukuMusashino;
const MAX_TITLES: usize = 15;

const VENUE: VenueDefaults = VenueDefaults {
    address: "東京都新宿区新宿3-27-10",
    phone: "03-3354-5670",
    access: "JR新宿駅東口より徒歩5分",
    screens: 2,
};

const TITLE_FILTER: TitleFilter<'static> = TitleFilter {
    min_chars: 3,
    max_chars: 99,
    boilerplate: &[
        "上映時間", "オンライン予約", "ニュース", "アクセス", "劇場案内", "株主", "公式", "はこちら",
        "まで（予定）", "更新", "決定", "導入", "販売",
    ],
    punctuation: "！？・",
    ascii_run: 2,
    non_ascii_ratio: Some(0.5),
};

const KNOWN_TITLES: [&str; 10] = [
    "「桐島です」",
    "恋するリベラーチェ ４Ｋ",
    "ＹＯＵＮＧ＆ＦＩＮＥ",
    "となりの宇宙人",
    "テルマがゆく！９３歳のやさしいリベンジ",
    "突然、君がいなくなって",
    "中山教頭の人生テスト",
    "年少日記",
    "無名の人生",
    "ロボット・ドリームズ",
];

/// News headings start with a dotted date like `2025.07.01`.
static NEWS_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}\.\d{2}\.\d{2}").expect("static regex"));

const TABLE_SCHEDULE: ScheduleLayout<'static> = ScheduleLayout {
    sections: &["table.schedule", "table.timetable"],
    title: &["h2", "h3", "caption", "div.movie-title"],
    days: &["tr"],
    date: &["th:first-child", "td:first-child"],
    times: &["td:not(:first-child)"],
    screen: None,
    default_screen: Some("スクリーン1"),
    require_iso_date: true,
};

const BLOCK_SCHEDULE: ScheduleLayout<'static> = ScheduleLayout {
    sections: &["div.schedule", "div.timetable", "section.schedule-section"],
    title: &["h2", "h3", "div.movie-title"],
    days: &["div.date-block", "div.schedule-day"],
    date: &["div.date", "span.date"],
    times: &["span.time", "div.time"],
    screen: Some("span.screen, div.screen"),
    default_screen: Some("スクリーン1"),
    require_iso_date: true,
};

pub struct ShinjukuMusashinoScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

impl ShinjukuMusashinoScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn url(path: &str) -> String {
        format!("{}{}", THEATER.base_url(), path)
    }

    /// Static first; the browser only if the static fetch fails.
    fn fetch(&mut self, url: &str) -> Result<Html, FetchError> {
        match fetch_document(self.pages.as_mut(), url, FetchMode::Static) {
            Ok(doc) => Ok(doc),
            Err(_) => {
                debug!(theater = THEATER.key(), url, "static fetch failed, rendering instead");
                fetch_document(self.pages.as_mut(), url, FetchMode::Rendered)
            }
        }
    }
}

fn titles(doc: &Html) -> Result<Vec<String>, ScraperError> {
    let headings: Vec<String> = doc
        .select(&parse_selector("h4")?)
        .map(element_text)
        .filter(|t| !NEWS_DATE.is_match(t))
        .collect();
    let found = candidate_titles(&headings, &TITLE_FILTER);
    Ok(merge_known_titles(
        found,
        &KNOWN_TITLES,
        &page_lines(doc).join("\n"),
        MAX_TITLES,
    ))
}

impl TheaterScraper for ShinjukuMusashinoScraper {
    fn theater_name(&self) -> &str {
        THEATER.display_name()
    }

    fn base_url(&self) -> &str {
        THEATER.base_url()
    }

    /// The access page 404s; venue facts are fixed.
    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
        Ok(VENUE.info(THEATER))
    }

    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
        let doc = self.fetch(&Self::url(""))?;
        Ok(titles(&doc)?.into_iter().map(MovieInfo::titled).collect())
    }

    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
        let mut schedules = Vec::new();
        let mut fetched = false;
        let mut last_err = None;
        for url in [Self::url("/schedule/"), Self::url("")] {
            match self.fetch(&url) {
                Ok(doc) => {
                    fetched = true;
                    for layout in [&TABLE_SCHEDULE, &BLOCK_SCHEDULE] {
                        schedules.extend(layout.extract(
                            doc.root_element(),
                            THEATER,
                            self.ctx.reference_year,
                        )?);
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) if !fetched => Err(e.into()),
            _ => Ok(schedules),
        }
    }
}
