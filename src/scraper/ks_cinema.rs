//! K's cinema (Shinjuku). Static pages; each film is a `div.box` inside
//! `div.movielist` whose text carries the title, staff lines and showtimes.

use super::{
    dedup_movies, element_lines, element_text, parse_selector, ScrapeContext, ScraperError,
    Theater, TheaterScraper,
};
use crate::fetch::{fetch_document, FetchMode, PageSource};
use crate::model::{MovieInfo, MovieSchedule, ShowtimeInfo, TheaterInfo};
use crate::normalize::{
    absolute_url, clean_text, extract_times, labelled_value, parse_duration_minutes, split_names,
    try_parse_date,
};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::warn;

use super::text::is_date_line;

const THEATER: Theater = Theater::KsCinema;
const SCREEN: &str = "スクリーン1";
/// Placeholder boxes that point at another page instead of listing a film.
const SEE_PROGRAM_NOTE: &str = "作品案内参照";

static TIME_IN_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}\s*[:：]\s*\d{2}").expect("static regex"));

pub struct KsCinemaScraper {
    pages: Box<dyn PageSource>,
    ctx: ScrapeContext,
}

/// One film box reduced to its text lines; first line is the title.
struct FilmBox {
    title: String,
    lines: Vec<String>,
    poster: Option<String>,
}

impl KsCinemaScraper {
    pub fn new(pages: Box<dyn PageSource>, ctx: ScrapeContext) -> Self {
        Self { pages, ctx }
    }

    fn url(path: &str) -> String {
        format!("{}{}", THEATER.base_url(), path)
    }

    fn film_boxes(&self, doc: &Html) -> Result<Vec<FilmBox>, ScraperError> {
        let boxes = parse_selector("div.movielist div.box")?;
        let text = parse_selector("div.movietxt")?;
        let image = parse_selector("img")?;
        let mut films = Vec::new();
        for el in doc.select(&boxes) {
            let Some(txt) = el.select(&text).next() else {
                continue;
            };
            match film_box(txt) {
                Some(mut film) => {
                    film.poster = el
                        .select(&image)
                        .find_map(|img| img.value().attr("src"))
                        .and_then(|src| absolute_url(THEATER.base_url(), src));
                    films.push(film);
                }
                None => {
                    warn!(
                        theater = THEATER.key(),
                        stage = "movies",
                        text = %element_text(txt),
                        "skipping box without a usable title"
                    );
                }
            }
        }
        Ok(films)
    }

    fn showtimes(&self, film: &FilmBox) -> Vec<ShowtimeInfo> {
        let mut showtimes: Vec<ShowtimeInfo> = Vec::new();
        for line in film.lines.iter().skip(1) {
            let times = extract_times(line);
            if is_date_line(line) {
                if let Some(date) = try_parse_date(line, self.ctx.reference_year) {
                    showtimes.push(ShowtimeInfo::new(date, times).on_screen(SCREEN));
                    continue;
                }
            }
            if times.is_empty() {
                continue;
            }
            match showtimes.last_mut() {
                Some(last) => last.times.extend(times),
                // Times with no date line above them are today's.
                None => showtimes.push(
                    ShowtimeInfo::new(self.ctx.today.format("%Y-%m-%d").to_string(), times)
                        .on_screen(SCREEN),
                ),
            }
        }
        showtimes.retain(|s| !s.times.is_empty());
        showtimes
    }
}

fn film_box(txt: ElementRef<'_>) -> Option<FilmBox> {
    let lines = element_lines(txt);
    let first = lines.first()?;
    let title = clean_text(&TIME_IN_TITLE.replace_all(first, ""));
    if title.is_empty() || title.contains(SEE_PROGRAM_NOTE) {
        return None;
    }
    Some(FilmBox {
        title,
        lines,
        poster: None,
    })
}

fn movie_info(film: &FilmBox) -> MovieInfo {
    let body = film.lines.join("\n");
    let mut movie = MovieInfo::titled(film.title.clone());
    movie.director = labelled_value(&body, &["監督", "Director"]);
    movie.cast = labelled_value(&body, &["出演", "Cast"])
        .map(|c| split_names(&c))
        .unwrap_or_default();
    movie.duration = parse_duration_minutes(&body);
    movie.poster_url = film.poster.clone();
    movie
}

impl TheaterScraper for KsCinemaScraper {
    fn theater_name(&self) -> &str {
        THEATER.display_name()
    }

    fn base_url(&self) -> &str {
        THEATER.base_url()
    }

    fn theater_info(&mut self) -> Result<TheaterInfo, ScraperError> {
        let doc = fetch_document(self.pages.as_mut(), &Self::url("/access/"), FetchMode::Static)?;
        let mut info = TheaterInfo::new(THEATER.display_name(), THEATER.base_url());
        if let Some(el) = doc.select(&parse_selector("div.address")?).next() {
            info.address = Some(element_text(el)).filter(|s| !s.is_empty());
        }
        info.phone = doc
            .select(&parse_selector("a[href^='tel:']")?)
            .find_map(|a| a.value().attr("href"))
            .map(|href| href.trim_start_matches("tel:").to_string());
        if let Some(el) = doc.select(&parse_selector("div.access-info")?).next() {
            info.access = Some(element_text(el)).filter(|s| !s.is_empty());
        }
        info.screens = Some(1);
        Ok(info)
    }

    fn movies(&mut self) -> Result<Vec<MovieInfo>, ScraperError> {
        let mut movies = Vec::new();
        let mut last_err = None;
        for url in [Self::url(""), Self::url("/coming/")] {
            match fetch_document(self.pages.as_mut(), &url, FetchMode::Static) {
                Ok(doc) => movies.extend(self.film_boxes(&doc)?.iter().map(movie_info)),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) if movies.is_empty() => Err(e.into()),
            _ => Ok(dedup_movies(movies)),
        }
    }

    fn schedules(&mut self) -> Result<Vec<MovieSchedule>, ScraperError> {
        let doc = fetch_document(self.pages.as_mut(), &Self::url(""), FetchMode::Static)?;
        let schedules = self
            .film_boxes(&doc)?
            .iter()
            .filter_map(|film| {
                let showtimes = self.showtimes(film);
                (!showtimes.is_empty()).then(|| MovieSchedule {
                    theater_name: THEATER.display_name().to_string(),
                    movie_title: film.title.clone(),
                    showtimes,
                })
            })
            .collect();
        Ok(schedules)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ctx, FixturePages};
    use super::*;

    const HOME: &str = "https://www.ks-cinema.com";

    fn single_film_page() -> &'static str {
        r#"<html><body><div class="movielist"><div class="box"><div class="movietxt">
            <h2>Test Film</h2><p>Director: Jane Doe</p><p>07/10 14:30, 19:00</p>
        </div></div></div></body></html>"#
    }

    #[test]
    fn single_film_fixture_end_to_end() {
        let pages = FixturePages::default().with(HOME, single_film_page());
        let mut scraper = KsCinemaScraper::new(Box::new(pages), ctx(2024));
        let data = scraper.scrape_all();

        assert_eq!(data.theater_info.name, "ケイズシネマ");
        assert_eq!(data.movies.len(), 1);
        assert_eq!(data.movies[0].title, "Test Film");
        assert_eq!(data.movies[0].director.as_deref(), Some("Jane Doe"));

        assert_eq!(data.schedules.len(), 1);
        let schedule = &data.schedules[0];
        assert_eq!(schedule.movie_title, "Test Film");
        assert_eq!(schedule.theater_name, "ケイズシネマ");
        assert_eq!(schedule.showtimes.len(), 1);
        assert_eq!(schedule.showtimes[0].date, "2024-07-10");
        assert_eq!(schedule.showtimes[0].times, vec!["14:30", "19:00"]);
    }

    #[test]
    fn placeholder_boxes_are_skipped_and_undated_times_are_today() {
        let page = r#"<div class="movielist">
            <div class="box"><div class="movietxt"><p>10:00 作品案内参照</p></div></div>
            <div class="box"><img src="/img/a.jpg"><div class="movietxt"><p>ドマーニ！愛のことづて</p><p>11:20 / 15:40</p></div></div>
            <div class="box"><div class="movietxt"><p>情報のみ</p></div></div>
        </div>"#;
        let pages = FixturePages::default().with(HOME, page);
        let mut scraper = KsCinemaScraper::new(Box::new(pages), ctx(2025));

        let movies = scraper.movies().unwrap_or_default();
        let titles: Vec<_> = movies.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, ["ドマーニ！愛のことづて", "情報のみ"]);
        assert_eq!(
            movies[0].poster_url.as_deref(),
            Some("https://www.ks-cinema.com/img/a.jpg")
        );

        let schedules = scraper.schedules().unwrap_or_default();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].showtimes[0].date, "2025-07-05");
        assert_eq!(schedules[0].showtimes[0].times, vec!["11:20", "15:40"]);
        assert_eq!(schedules[0].showtimes[0].screen.as_deref(), Some("スクリーン1"));
    }

    #[test]
    fn access_page_fills_venue_facts() -> Result<(), ScraperError> {
        let access = r#"<div class="address"> 東京都新宿区新宿3-35-13 3F </div>
            <a href="tel:03-3354-6288">電話</a><div class="access-info">JR新宿駅東南口より徒歩3分</div>"#;
        let pages = FixturePages::default().with("https://www.ks-cinema.com/access/", access);
        let mut scraper = KsCinemaScraper::new(Box::new(pages), ctx(2025));
        let info = scraper.theater_info()?;
        assert_eq!(info.address.as_deref(), Some("東京都新宿区新宿3-35-13 3F"));
        assert_eq!(info.phone.as_deref(), Some("03-3354-6288"));
        assert_eq!(info.screens, Some(1));
        Ok(())
    }
}
