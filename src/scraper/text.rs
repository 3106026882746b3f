//! Line-level heuristics for pages that list titles and showtimes as flowing text.
//!
//! Everything here is a pure function over strings so site fixtures can be
//! replayed without a network.

use crate::model::{MovieSchedule, ShowtimeInfo};
use crate::normalize::{clean_text, extract_times, fold_width, try_parse_date, DATE_SHAPES};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Any normalizable date shape at the start of the line.
static DATE_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*(?:{})", DATE_SHAPES.join("|"))).expect("static regex")
});

static TIME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}\s*[:：]\s*\d{2}").expect("static regex"));

static NUMERIC_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s.,:/\-()（）]+$").expect("static regex"));

/// Line starts with a date such as `7/5`, `7月5日`, `7.5` or `2025-07-05`.
pub fn is_date_line(line: &str) -> bool {
    DATE_LEAD.is_match(&fold_width(line))
}

/// Line holds one or more times and nothing else but separators.
pub fn is_time_line(line: &str) -> bool {
    let line = fold_width(line);
    if !TIME_TOKEN.is_match(&line) {
        return false;
    }
    TIME_TOKEN
        .replace_all(&line, "")
        .chars()
        .all(|c| c.is_whitespace() || ",、～〜~-/|・".contains(c))
}

pub fn is_katakana(c: char) -> bool {
    ('ァ'..='ヴ').contains(&c) || c == 'ー'
}

fn longest_ascii_letter_run(line: &str) -> usize {
    line.split(|c: char| !c.is_ascii_alphabetic())
        .map(str::len)
        .max()
        .unwrap_or(0)
}

fn non_ascii_ratio(line: &str) -> f64 {
    let total = line.chars().count();
    if total == 0 {
        return 0.0;
    }
    let non_ascii = line.chars().filter(|c| !c.is_ascii()).count();
    non_ascii as f64 / total as f64
}

/// Per-site tuning for what counts as a title line.
#[derive(Debug, Clone, Copy)]
pub struct TitleFilter<'a> {
    /// Inclusive length bounds in characters.
    pub min_chars: usize,
    pub max_chars: usize,
    /// A line containing any of these is never a title.
    pub boilerplate: &'a [&'a str],
    /// Decorative punctuation that marks a title.
    pub punctuation: &'a str,
    /// Shortest ASCII letter run that counts as a signal.
    pub ascii_run: usize,
    /// Non-ASCII share above which a line counts as a title.
    pub non_ascii_ratio: Option<f64>,
}

impl Default for TitleFilter<'_> {
    fn default() -> Self {
        Self {
            min_chars: 3,
            max_chars: 49,
            boilerplate: &[],
            punctuation: "！？♪☆",
            ascii_run: 2,
            non_ascii_ratio: None,
        }
    }
}

impl TitleFilter<'_> {
    /// Line passes the exclusions and shows at least one title signal.
    pub fn is_title_like(&self, line: &str) -> bool {
        let len = line.chars().count();
        if len < self.min_chars || len > self.max_chars {
            return false;
        }
        if is_date_line(line) || is_time_line(line) || NUMERIC_ONLY.is_match(line) {
            return false;
        }
        if self.boilerplate.iter().any(|b| line.contains(b)) {
            return false;
        }
        line.chars().any(|c| self.punctuation.contains(c))
            || line.chars().any(is_katakana)
            || longest_ascii_letter_run(line) >= self.ascii_run
            || self
                .non_ascii_ratio
                .is_some_and(|min| non_ascii_ratio(line) > min)
    }
}

/// Title-like lines, cleaned and deduplicated by exact match, in page order.
pub fn candidate_titles<S: AsRef<str>>(lines: &[S], filter: &TitleFilter<'_>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .map(|l| clean_text(l.as_ref()))
        .filter(|l| filter.is_title_like(l))
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

/// Append known titles that actually occur in `page_text`, dedup, and cap at `max`.
pub fn merge_known_titles(
    mut found: Vec<String>,
    known: &[&str],
    page_text: &str,
    max: usize,
) -> Vec<String> {
    for title in known {
        if page_text.contains(title) && !found.iter().any(|f| f == title) {
            found.push(title.to_string());
        }
    }
    found.truncate(max);
    found
}

/// Positional date/time association over page lines.
///
/// A title line opens a bucket and flushes the previous one. A date line adds
/// a showtime (with any times on the same line) to the open bucket. A time
/// line appends to the latest showtime. Showtimes left without times are
/// dropped, as are buckets left without showtimes.
pub fn associate_schedule<S: AsRef<str>>(
    lines: &[S],
    theater_name: &str,
    reference_year: i32,
    filter: &TitleFilter<'_>,
) -> Vec<MovieSchedule> {
    let mut schedules = Vec::new();
    let mut bucket: Option<(String, Vec<ShowtimeInfo>)> = None;

    for raw in lines {
        let line = clean_text(raw.as_ref());
        if line.is_empty() {
            continue;
        }
        if is_date_line(&line) {
            if let Some((_, showtimes)) = bucket.as_mut() {
                let date = try_parse_date(&line, reference_year).unwrap_or_else(|| line.clone());
                showtimes.push(ShowtimeInfo::new(date, extract_times(&line)));
            }
        } else if is_time_line(&line) {
            if let Some(last) = bucket.as_mut().and_then(|(_, s)| s.last_mut()) {
                last.times.extend(extract_times(&line));
            }
        } else if filter.is_title_like(&line) {
            flush_bucket(bucket.take(), theater_name, &mut schedules);
            bucket = Some((line, Vec::new()));
        }
    }
    flush_bucket(bucket, theater_name, &mut schedules);
    schedules
}

fn flush_bucket(
    bucket: Option<(String, Vec<ShowtimeInfo>)>,
    theater_name: &str,
    out: &mut Vec<MovieSchedule>,
) {
    let Some((title, mut showtimes)) = bucket else {
        return;
    };
    showtimes.retain(|s| !s.times.is_empty());
    if !showtimes.is_empty() {
        out.push(MovieSchedule {
            theater_name: theater_name.to_string(),
            movie_title: title,
            showtimes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_and_time_lines() {
        assert!(is_date_line("7/5(土)"));
        assert!(is_date_line("07/10 14:30, 19:00"));
        assert!(is_date_line("12月24日(水)"));
        assert!(is_date_line("2025-07-05"));
        assert!(is_date_line("７／５"));
        assert!(!is_date_line("14:30"));
        assert!(!is_date_line("シンシン／SING SING"));

        assert!(is_time_line("14:30"));
        assert!(is_time_line("10:40、16:15"));
        assert!(is_time_line("９：５０～"));
        assert!(!is_time_line("14:30 トークあり"));
        assert!(!is_time_line("上映時間"));
    }

    #[test]
    fn title_signals() {
        let filter = TitleFilter {
            boilerplate: &["お知らせ", "http"],
            ..TitleFilter::default()
        };
        assert!(filter.is_title_like("ドマーニ！愛のことづて"));
        assert!(filter.is_title_like("シンシン／SING SING"));
        assert!(filter.is_title_like("Perfect Days"));
        assert!(!filter.is_title_like("お知らせ一覧"));
        assert!(!filter.is_title_like("7/5(土)"));
        assert!(!filter.is_title_like("123"));
        assert!(!filter.is_title_like("ab"));
        // Plain kanji with no signal needs the ratio rule.
        assert!(!filter.is_title_like("年少日記"));
        let by_ratio = TitleFilter {
            non_ascii_ratio: Some(0.5),
            ..filter
        };
        assert!(by_ratio.is_title_like("年少日記"));
    }

    #[test]
    fn candidates_are_deduplicated_in_order() {
        let lines = ["旅するローマ教皇", "  旅するローマ教皇 ", "7/5(土)", "カップルズ 4Kレストア版"];
        assert_eq!(
            candidate_titles(&lines, &TitleFilter::default()),
            vec!["旅するローマ教皇", "カップルズ 4Kレストア版"]
        );
    }

    #[test]
    fn known_titles_merge_only_when_present() {
        let found = vec!["ラ・ジュテ".to_string()];
        let merged = merge_known_titles(
            found,
            &["惑星ソラリス", "ラ・ジュテ", "未上映の作品"],
            "惑星ソラリス＋ラ・ジュテ 7/5(土)",
            10,
        );
        assert_eq!(merged, vec!["ラ・ジュテ", "惑星ソラリス"]);
        let capped = merge_known_titles(merged, &[], "", 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn association_buckets_by_title() {
        let lines = [
            "旅するローマ教皇",
            "7/5(土) 10:40",
            "16:15",
            "7/6(日)",
            "12:00",
            "シンシン／SING SING",
            "7/7(月)",
            "カップルズ 4Kレストア版",
            "7/8(火) 18:30",
        ];
        let schedules = associate_schedule(&lines, "下高井戸シネマ", 2025, &TitleFilter::default());
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].movie_title, "旅するローマ教皇");
        assert_eq!(schedules[0].theater_name, "下高井戸シネマ");
        assert_eq!(
            schedules[0].showtimes,
            vec![
                ShowtimeInfo::new("2025-07-05", vec!["10:40".into(), "16:15".into()]),
                ShowtimeInfo::new("2025-07-06", vec!["12:00".into()]),
            ]
        );
        // SING SING had a date but no time: dropped entirely.
        assert_eq!(schedules[1].movie_title, "カップルズ 4Kレストア版");
        assert_eq!(schedules[1].showtimes[0].times, vec!["18:30"]);
    }

    #[test]
    fn spaced_date_lines_normalize() {
        let lines = ["旅するローマ教皇", "7月 5日(土) 10:40", "7 / 6 12:00"];
        let schedules = associate_schedule(&lines, "下高井戸シネマ", 2025, &TitleFilter::default());
        assert_eq!(schedules.len(), 1);
        assert_eq!(
            schedules[0].showtimes,
            vec![
                ShowtimeInfo::new("2025-07-05", vec!["10:40".into()]),
                ShowtimeInfo::new("2025-07-06", vec!["12:00".into()]),
            ]
        );
    }

    #[test]
    fn dates_before_any_title_are_ignored() {
        let lines = ["7/5(土) 10:40", "12:00"];
        assert!(associate_schedule(&lines, "x", 2025, &TitleFilter::default()).is_empty());
    }
}
