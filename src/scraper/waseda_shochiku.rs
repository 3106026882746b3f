//! Waseda Shochiku, a repertory double-feature house. The programme is one
//! static page: a date line such as `7/5(土)･7(月)･9(水)` followed by the
//! film titles of that programme and their start times.

use super::text::{candidate_titles, is_date_line, is_time_line, merge_known_titles, TitleFilter};
use super::{page_lines, ScrapeContext, ScraperError, Theater, TheaterScraper, VenueDefaults};
use crate::fetch::{fetch_document, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, ShowtimeInfo, TheaterInfo};
use crate::normalize::{clean_text, extract_times, fold_width, try_parse_date};
use once_cell::sync::Lazy;
use regex::Regex;

const THEATER: Theater = Theater::WasedaShochiku;
const SCREEN: &str = "スクリーン1";
const MAX_TITLES: usize = 10;

const VENUE: VenueDefaults = VenueDefaults {
    address: "東京都新宿区高田馬場1-5-16",
    phone: "03-3200-8968",
    access: "JR山手線・西武新宿線・東西線高田馬場駅より徒歩3分",
    screens: 1,
};

const TITLE_FILTER: TitleFilter<'static> = TitleFilter {
    min_chars: 4,
    max_chars: 49,
    boilerplate: &[
        "official", "web", "site", "名画座", "高田馬場", "年", "月", "日", "時", "分", ":",
        "http", "www", ".com", "@",
    ],
    punctuation: "＋＆・",
    ascii_run: 3,
    non_ascii_ratio: Some(0.3),
};

const KNOWN_TITLES: [&str; 3] = ["惑星ソラリス", "ラ・ジュテ", "ジュ・テーム、ジュ・テーム"];

/// `7/5(土)` or a bare `7(月)` continuing the previous month.
static PROGRAMME_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:(\d{1,2})/)?(\d{1,2})\s*\(").expect("static regex"));

static TIME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}\s*[:：]\s*\d{2}").expect("static regex"));

pub struct WasedaShochikuScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

/// Split a double-feature line on `+`/`＋`; parts of two chars or less are dropped.
fn split_double_feature(line: &str) -> Vec<String> {
    line.split(['+', '＋'])
        .map(clean_text)
        .filter(|t| t.chars().count() > 2)
        .collect()
}

/// Every date named on a programme line, in order.
fn programme_dates(line: &str, reference_year: i32) -> Vec<String> {
    let line = fold_width(line);
    let mut month = None;
    let mut dates = Vec::new();
    for caps in PROGRAMME_DAY.captures_iter(&line) {
        if let Some(m) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            month = Some(m);
        }
        let day = caps.get(2).and_then(|d| d.as_str().parse::<u32>().ok());
        if let (Some(month), Some(day)) = (month, day) {
            dates.push(format!("{:04}-{:02}-{:02}", reference_year, month, day));
        }
    }
    if dates.is_empty() {
        dates.extend(try_parse_date(&line, reference_year));
    }
    dates
}

/// Programme currently being read.
#[derive(Default)]
struct Programme {
    dates: Vec<String>,
    titles: Vec<String>,
    times: Vec<String>,
}

impl Programme {
    /// Emit one schedule entry per title, merging into an existing title's schedule.
    fn flush(&mut self, out: &mut Vec<MovieSchedule>) {
        let titles = std::mem::take(&mut self.titles);
        let times = std::mem::take(&mut self.times);
        if self.dates.is_empty() || times.is_empty() {
            return;
        }
        for title in titles {
            let showtimes = self
                .dates
                .iter()
                .map(|d| ShowtimeInfo::new(d.clone(), times.clone()).on_screen(SCREEN));
            match out.iter_mut().find(|s| s.movie_title == title) {
                Some(existing) => existing.showtimes.extend(showtimes),
                None => out.push(MovieSchedule {
                    theater_name: THEATER.display_name().to_string(),
                    movie_title: title,
                    showtimes: showtimes.collect(),
                }),
            }
        }
    }
}

fn titles(lines: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for candidate in candidate_titles(lines, &TITLE_FILTER) {
        for title in split_double_feature(&candidate) {
            if !found.contains(&title) {
                found.push(title);
            }
        }
    }
    merge_known_titles(found, &KNOWN_TITLES, &lines.join("\n"), MAX_TITLES)
}

fn programme_schedules(lines: &[String], reference_year: i32) -> Vec<MovieSchedule> {
    let mut schedules = Vec::new();
    let mut programme = Programme::default();
    for line in lines {
        if is_date_line(line) {
            programme.flush(&mut schedules);
            programme.dates = programme_dates(line, reference_year);
        } else if is_time_line(line) {
            programme.times.extend(extract_times(line));
        } else {
            // Title and times may share a line, e.g. "惑星ソラリス 10:40 16:15".
            let title_part = clean_text(&TIME_TOKEN.replace_all(line, " "));
            let is_title = TITLE_FILTER.is_title_like(&title_part)
                || KNOWN_TITLES.contains(&title_part.as_str());
            if !is_title {
                continue;
            }
            if !programme.times.is_empty() {
                programme.flush(&mut schedules);
            }
            programme.titles.extend(split_double_feature(&title_part));
            programme.times.extend(extract_times(line));
        }
    }
    programme.flush(&mut schedules);
    schedules
}

impl WasedaShochikuScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn page(&mut self) -> Result<Vec<String>, ScraperError> {
        let doc = fetch_document(self.pages.as_mut(), THEATER.base_url(), FetchMode::Static)?;
        Ok(page_lines(&doc))
    }
}

impl TheaterScraper for WasedaShochikuScraper {
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
        Ok(programme_schedules(&lines, self.ctx.reference_year))
    }
}
