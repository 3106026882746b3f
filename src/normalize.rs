//! Text and date normalization shared by all site scrapers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Date shapes in priority order. Two-group patterns carry no year.
pub(crate) const DATE_SHAPES: [&str; 4] = [
    r"(\d{1,2})\s*/\s*(\d{1,2})",
    r"(\d{1,2})\s*月\s*(\d{1,2})\s*日?",
    r"(\d{4})-(\d{1,2})-(\d{1,2})",
    r"(\d{1,2})\s*\.\s*(\d{1,2})",
];

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    DATE_SHAPES
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
});

static TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*[:：]\s*(\d{2})").expect("static regex"));

static DURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*分").expect("static regex"));

/// Collapse whitespace runs (newlines included) to one space and trim.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Like [`clean_text`], but `None` when nothing is left.
pub fn non_empty(s: &str) -> Option<String> {
    let cleaned = clean_text(s);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Normalize a date string to `YYYY-MM-DD`, or `None` when no known shape matches.
///
/// Shapes are tried in order: `M/D`, `M月D日`, `YYYY-M-D`, `M.D`; the first match
/// wins. Year-less shapes take `reference_year`. Month and day are not range-checked.
pub fn try_parse_date(text: &str, reference_year: i32) -> Option<String> {
    let text = fold_width(text);
    for pattern in DATE_PATTERNS.iter() {
        let Some(caps) = pattern.captures(&text) else {
            continue;
        };
        let nums: Vec<u32> = caps
            .iter()
            .skip(1)
            .flatten()
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        return match nums.as_slice() {
            [month, day] => Some(format!("{:04}-{:02}-{:02}", reference_year, month, day)),
            [year, month, day] => Some(format!("{:04}-{:02}-{:02}", year, month, day)),
            _ => None,
        };
    }
    None
}

/// Best-effort date normalization. Unrecognized input comes back unchanged.
pub fn parse_date(text: &str, reference_year: i32) -> String {
    try_parse_date(text, reference_year).unwrap_or_else(|| text.to_string())
}

/// Every time-of-day in `text`, as zero-padded `HH:MM`, in order of appearance.
pub fn extract_times(text: &str) -> Vec<String> {
    let text = fold_width(text);
    TIME.captures_iter(&text)
        .filter_map(|caps| {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute = caps.get(2)?.as_str();
            Some(format!("{:02}:{}", hour, minute))
        })
        .collect()
}

/// Normalize a single time like "9：50～" to "09:50". `None` if no time is present.
pub fn normalize_time(text: &str) -> Option<String> {
    extract_times(text).into_iter().next()
}

/// Running time from text such as "上映時間 120分".
pub fn parse_duration_minutes(text: &str) -> Option<u32> {
    let text = fold_width(text);
    DURATION
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Split a cast or staff list on `,`, `、`, `，` or `/`.
pub fn split_names(text: &str) -> Vec<String> {
    text.split([',', '、', '，', '/', '／'])
        .map(clean_text)
        .filter(|s| !s.is_empty())
        .collect()
}

/// The value following the first matching label on the same line, e.g. "監督：X" → "X".
///
/// Both full-width and ASCII colons are accepted after the label.
pub fn labelled_value(text: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        for line in text.lines() {
            let Some(pos) = line.find(label) else {
                continue;
            };
            let rest = &line[pos + label.len()..];
            let rest = rest
                .trim_start()
                .strip_prefix('：')
                .or_else(|| rest.trim_start().strip_prefix(':'));
            let value = rest
                .map(|r| r.split('/').next().unwrap_or(r))
                .and_then(non_empty);
            if value.is_some() {
                return value;
            }
        }
    }
    None
}

/// Resolve an image or link `src` against the site base URL.
pub fn absolute_url(base_url: &str, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    if src.starts_with("http://") || src.starts_with("https://") {
        return Some(src.to_string());
    }
    if let Some(rest) = src.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    let base = base_url.trim_end_matches('/');
    if src.starts_with('/') {
        Some(format!("{}{}", base, src))
    } else {
        Some(format!("{}/{}", base, src))
    }
}

/// Fold full-width ASCII digits and separators to their half-width forms.
pub(crate) fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '／' => '/',
            '．' => '.',
            '－' => '-',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a\n\tb  "), "a b");
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n "), "");
        assert_eq!(clean_text("東京都　渋谷区\r\n円山町"), "東京都 渋谷区 円山町");
    }

    #[test]
    fn clean_text_is_idempotent() {
        for s in ["  a\n\tb  ", "", "x", " 　混在 \n text\t\t", "a  b   c"] {
            let once = clean_text(s);
            assert_eq!(clean_text(&once), once);
        }
    }

    #[test]
    fn parse_date_month_day_takes_reference_year() {
        assert_eq!(parse_date("7/5", 2025), "2025-07-05");
        assert_eq!(parse_date("7/5(土)", 2026), "2026-07-05");
        assert_eq!(parse_date("12月24日(水)", 2025), "2025-12-24");
        assert_eq!(parse_date("7.10", 2024), "2024-07-10");
        assert_eq!(parse_date("０７／１０", 2024), "2024-07-10");
        assert_eq!(parse_date("7月 5日(土)", 2025), "2025-07-05");
        assert_eq!(parse_date("7 / 6", 2025), "2025-07-06");
    }

    #[test]
    fn parse_date_full_date_keeps_embedded_year() {
        assert_eq!(parse_date("2025-07-05", 1999), "2025-07-05");
        assert_eq!(parse_date("2024-1-9", 2025), "2024-01-09");
    }

    #[test]
    fn parse_date_passes_unrecognized_input_through() {
        assert_eq!(parse_date("garbage", 2025), "garbage");
        assert_eq!(parse_date("", 2025), "");
        assert_eq!(try_parse_date("近日公開", 2025), None);
    }

    #[test]
    fn parse_date_priority_is_slash_first() {
        // Both M/D and M月D日 present: the slash form wins.
        assert_eq!(parse_date("8月1日 (7/31 前夜祭)", 2025), "2025-07-31");
    }

    #[test]
    fn extract_times_normalizes_and_pads() {
        assert_eq!(extract_times("14:30, 19:00"), vec!["14:30", "19:00"]);
        assert_eq!(extract_times("９：５０～"), vec!["09:50"]);
        assert_eq!(extract_times("10:40 16:15"), vec!["10:40", "16:15"]);
        assert!(extract_times("no times").is_empty());
        assert_eq!(normalize_time("14：30～"), Some("14:30".to_string()));
    }

    #[test]
    fn duration_and_names() {
        assert_eq!(parse_duration_minutes("2024年／フランス／120分"), Some(120));
        assert_eq!(parse_duration_minutes("８３分"), Some(83));
        assert_eq!(parse_duration_minutes("未定"), None);
        assert_eq!(
            split_names("役所広司、 柄本時生 , Pope Francis"),
            vec!["役所広司", "柄本時生", "Pope Francis"]
        );
    }

    #[test]
    fn labelled_value_reads_after_colon() {
        let text = "2024年／日本\n監督：井口奈己 / 脚本：同\n出演: 役所広司、柄本時生";
        assert_eq!(labelled_value(text, &["監督"]), Some("井口奈己".to_string()));
        assert_eq!(
            labelled_value(text, &["出演"]),
            Some("役所広司、柄本時生".to_string())
        );
        assert_eq!(labelled_value(text, &["ジャンル"]), None);
        assert_eq!(
            labelled_value("Director: Jane Doe", &["監督", "Director"]),
            Some("Jane Doe".to_string())
        );
    }

    #[test]
    fn absolute_url_resolves_relative_forms() {
        let base = "https://www.ks-cinema.com";
        assert_eq!(
            absolute_url(base, "/img/a.jpg").as_deref(),
            Some("https://www.ks-cinema.com/img/a.jpg")
        );
        assert_eq!(
            absolute_url(base, "//cdn.example.com/a.jpg").as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
        assert_eq!(
            absolute_url(base, "http://x.jp/a.jpg").as_deref(),
            Some("http://x.jp/a.jpg")
        );
        assert_eq!(absolute_url(base, "  "), None);
    }
}
