//! Shimotakaido Cinema. A single static page of flowing text: titles are
//! picked out line by line and each title is followed by its run dates and
//! start time.

use super::text::{associate_schedule, candidate_titles, merge_known_titles, TitleFilter};
use super::{
    page_lines, ScrapeContext, ScraperError, Theater, TheaterScraper, VenueDefaults,
};
use crate::fetch::{fetch_document, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, ShowtimeInfo, TheaterInfo};
use crate::normalize::{normalize_time, try_parse_date};
use regex::Regex;
use tracing::{debug, warn};

const THEATER: Theater = Theater::Shimotakaido;
const SCREEN: &str = "スクリーン1";
const MAX_TITLES: usize = 10;

const VENUE: VenueDefaults = VenueDefaults {
    address: "東京都世田谷区松原3-27-26",
    phone: "03-3321-0684",
    access: "京王線下高井戸駅より徒歩3分",
    screens: 1,
};

const TITLE_FILTER: TitleFilter<'static> = TitleFilter {
    min_chars: 3,
    max_chars: 49,
    boilerplate: &[
        "年", "月", "日", "時", "分", "～", ":", "http", "www", ".com", "@", "トップ", "お知らせ",
        "上映", "開催", "トーク", "監督", "先着", "プレゼント", "決定", "追加",
    ],
    punctuation: "！？♪☆",
    ascii_run: 2,
    non_ascii_ratio: None,
};

/// Looser title rule for the line-association fallback.
const FALLBACK_FILTER: TitleFilter<'static> = TitleFilter {
    min_chars: 4,
    max_chars: 29,
    boilerplate: &["年", "月", "日", "時", "～", ":", "お知らせ", "トーク"],
    punctuation: "！？♪☆",
    ascii_run: 2,
    non_ascii_ratio: None,
};

/// Titles the page layout reliably loses; added when they appear in the text.
const KNOWN_TITLES: [&str; 5] = [
    "旅するローマ教皇",
    "ドマーニ！愛のことづて",
    "シンシン／SING SING",
    "カップルズ 4Kレストア版",
    "井口奈己監督特集",
];

pub struct ShimotakaidoScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

impl ShimotakaidoScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn page(&mut self) -> Result<Vec<String>, ScraperError> {
        let doc = fetch_document(self.pages.as_mut(), THEATER.base_url(), FetchMode::Static)?;
        Ok(page_lines(&doc))
    }

    /// `title … 7/5(土)～7/11(金) 10:40～` for each title, start date of the run.
    fn run_schedules(&self, titles: &[String], text: &str) -> Vec<MovieSchedule> {
        let mut schedules = Vec::new();
        for title in titles {
            let pattern = format!(
                r"(?s){}\s*.*?(\d{{1,2}}/\d{{1,2}}\(.\)～\d{{1,2}}/\d{{1,2}}\(.\))\s*(\d{{1,2}}[:：]\d{{2}})",
                regex::escape(title)
            );
            let re = match Regex::new(&pattern) {
                Ok(re) => re,
                Err(e) => {
                    warn!(theater = THEATER.key(), title = %title, error = %e, "bad title pattern");
                    continue;
                }
            };
            let showtimes: Vec<ShowtimeInfo> = re
                .captures_iter(text)
                .filter_map(|caps| {
                    let date = try_parse_date(caps.get(1)?.as_str(), self.ctx.reference_year)?;
                    let time = normalize_time(caps.get(2)?.as_str())?;
                    Some(ShowtimeInfo::new(date, vec![time]).on_screen(SCREEN))
                })
                .collect();
            if !showtimes.is_empty() {
                schedules.push(MovieSchedule {
                    theater_name: THEATER.display_name().to_string(),
                    movie_title: title.clone(),
                    showtimes,
                });
            }
        }
        schedules
    }
}

fn titles(lines: &[String]) -> Vec<String> {
    let lines: Vec<&String> = lines
        .iter()
        .filter(|l| !l.starts_with('終') && !l.starts_with('開'))
        .collect();
    let found = candidate_titles(&lines, &TITLE_FILTER);
    let text = lines.iter().map(|l| l.as_str()).collect::<Vec<_>>().join("\n");
    merge_known_titles(found, &KNOWN_TITLES, &text, MAX_TITLES)
}

impl TheaterScraper for ShimotakaidoScraper {
    fn theater_name(&self) -> &str {
        THEATER.display_name()
    }

    fn base_url(&self) -> &str {
        THEATER.base_url()
    }

    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
        Ok(VENUE.info(THEATER))
    }

    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
        let lines = self.page()?;
        Ok(titles(&lines).into_iter().map(MovieInfo::titled).collect())
    }

    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
        let lines = self.page()?;
        let text = lines.join("\n");
        let schedules = self.run_schedules(&titles(&lines), &text);
        if !schedules.is_empty() {
            return Ok(schedules);
        }
        debug!(theater = THEATER.key(), "no run patterns matched, associating lines");
        Ok(associate_schedule(
            &lines,
            THEATER.display_name(),
            self.ctx.reference_year,
            &FALLBACK_FILTER,
        )
        .into_iter()
        .map(|mut s| {
            for showtime in &mut s.showtimes {
                showtime.screen = Some(SCREEN.to_string());
            }
            s
        })
        .collect())
    }
}
