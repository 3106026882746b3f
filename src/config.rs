//! Optional config file loading. Search order: ./cinescrape.toml, then
//! $XDG_CONFIG_HOME/cinescrape/config.toml (or ~/.config/cinescrape/config.toml).

use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Snapshot and log directory (default `output`). Relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// User-Agent for both HTTP requests and the browser.
    pub user_agent: Option<String>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts for transient failures (default 3).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry (e.g. [1, 2, 4]).
    pub retry_backoff_secs: Option<Vec<u64>>,
    /// Delay between HTTP requests to the same site, in milliseconds.
    pub request_delay_ms: Option<u64>,
    /// Pause between theaters in a batch, in seconds.
    pub theater_delay_secs: Option<u64>,
    /// Per-page budget for browser rendering, in seconds.
    pub render_timeout_secs: Option<u64>,
    /// Chromium binary; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// Year for dates that omit one. Defaults to the current local year.
    pub reference_year: Option<i32>,
}

/// Search order: (1) ./cinescrape.toml, (2) $XDG_CONFIG_HOME/cinescrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("cinescrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("cinescrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            return Ok(Some(config));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let c: Config = toml::from_str("").unwrap();
        assert!(c.output_dir.is_none());
        assert!(c.user_agent.is_none());
        assert!(c.timeout_secs.is_none());
        assert!(c.retry_count.is_none());
        assert!(c.retry_backoff_secs.is_none());
        assert!(c.request_delay_ms.is_none());
        assert!(c.theater_delay_secs.is_none());
        assert!(c.render_timeout_secs.is_none());
        assert!(c.chrome_executable.is_none());
        assert!(c.reference_year.is_none());
    }

    #[test]
    fn parse_full_config() {
        let s = r#"
            output_dir = "snapshots"
            user_agent = "Custom/1.0"
            timeout_secs = 60
            retry_count = 5
            retry_backoff_secs = [1, 2, 4, 8]
            request_delay_ms = 500
            theater_delay_secs = 5
            render_timeout_secs = 20
            chrome_executable = "/usr/bin/chromium"
            reference_year = 2025
        "#;
        let c: Config = toml::from_str(s).unwrap();
        assert_eq!(c.output_dir.as_deref(), Some(std::path::Path::new("snapshots")));
        assert_eq!(c.user_agent.as_deref(), Some("Custom/1.0"));
        assert_eq!(c.timeout_secs, Some(60));
        assert_eq!(c.retry_count, Some(5));
        assert_eq!(
            c.retry_backoff_secs.as_deref(),
            Some([1, 2, 4, 8].as_slice())
        );
        assert_eq!(c.request_delay_ms, Some(500));
        assert_eq!(c.theater_delay_secs, Some(5));
        assert_eq!(c.render_timeout_secs, Some(20));
        assert_eq!(
            c.chrome_executable.as_deref(),
            Some(std::path::Path::new("/usr/bin/chromium"))
        );
        assert_eq!(c.reference_year, Some(2025));
    }

    #[test]
    fn parse_partial_config() {
        let c: Config = toml::from_str("theater_delay_secs = 0").unwrap();
        assert!(c.output_dir.is_none());
        assert_eq!(c.theater_delay_secs, Some(0));
        assert!(c.reference_year.is_none());
    }

    #[test]
    fn invalid_toml_errors() {
        assert!(toml::from_str::<Config>("output_dir = [").is_err());
        assert!(toml::from_str::<Config>("reference_year = \"soon\"").is_err());
    }
}
