use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Browser / site configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_landing_url")]
    pub landing_url: String,

    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Seconds to wait for any expected page element.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
}

/// Where run artefacts are written
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_temp_file")]
    pub temp_file: String,

    #[serde(default = "default_final_file")]
    pub final_file: String,

    #[serde(default = "default_fallback_file")]
    pub fallback_file: String,
}

/// Default run parameters; CLI flags override these.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,

    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    #[serde(default = "default_interval_days")]
    pub interval_days: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_landing_url() -> String {
    "https://www.sikafinance.com/premium/articles".to_string()
}
fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_connect_attempts() -> usize {
    3
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_temp_file() -> String {
    "stock_data_temp.csv".to_string()
}
fn default_final_file() -> String {
    "stock_data.csv".to_string()
}
fn default_fallback_file() -> String {
    "stock_data_fallback.csv".to_string()
}
fn default_interval_days() -> u32 {
    30
}
pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default()
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            landing_url: default_landing_url(),
            webdriver_url: default_webdriver_url(),
            headless: true,
            timeout_secs: default_timeout_secs(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            temp_file: default_temp_file(),
            final_file: default_final_file(),
            fallback_file: default_fallback_file(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            interval_days: default_interval_days(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            output: OutputConfig::default(),
            run: RunConfig::default(),
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("start date {start} must be before end date {end}")]
    StartNotBeforeEnd { start: NaiveDate, end: NaiveDate },

    #[error("interval must be a positive number of days")]
    ZeroInterval,

    #[error("timeout must be a positive number of seconds")]
    ZeroTimeout,

    #[error("{field} is not a valid URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// Validated window of a single scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub interval_days: u32,
}

impl RunParams {
    pub fn new(start: NaiveDate, end: NaiveDate, interval_days: u32) -> Result<Self, ConfigError> {
        if start >= end {
            return Err(ConfigError::StartNotBeforeEnd { start, end });
        }
        if interval_days == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self { start, end, interval_days })
    }
}

impl RunConfig {
    /// Resolve run parameters, letting explicit values win over the file.
    pub fn resolve(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        interval_days: Option<u32>,
    ) -> Result<RunParams, ConfigError> {
        RunParams::new(
            start.or(self.start_date).unwrap_or_else(default_start_date),
            end.or(self.end_date).unwrap_or_else(|| Local::now().date_naive()),
            interval_days.unwrap_or(self.interval_days),
        )
    }
}

impl ScraperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        for (field, value) in [
            ("landing_url", &self.landing_url),
            ("webdriver_url", &self.webdriver_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
                field,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OutputConfig {
    pub fn temp_path(&self) -> PathBuf {
        self.dir.join(&self.temp_file)
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join(&self.final_file)
    }

    pub fn fallback_path(&self) -> PathBuf {
        self.dir.join(&self.fallback_file)
    }

    /// All three files under `dir` with default names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("BRVM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_cfg = match cfg.try_deserialize::<AppConfig>() {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring unreadable configuration ({}), using defaults", e);
                AppConfig::default()
            }
        };
        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_run_params_rules() {
        assert!(RunParams::new(d(2023, 1, 1), d(2023, 3, 5), 30).is_ok());
        assert_eq!(
            RunParams::new(d(2023, 3, 5), d(2023, 3, 5), 30),
            Err(ConfigError::StartNotBeforeEnd { start: d(2023, 3, 5), end: d(2023, 3, 5) })
        );
        assert_eq!(
            RunParams::new(d(2023, 1, 1), d(2023, 3, 5), 0),
            Err(ConfigError::ZeroInterval)
        );
    }

    #[test]
    fn test_resolve_prefers_explicit_values() {
        let run = RunConfig {
            start_date: Some(d(2022, 6, 1)),
            end_date: Some(d(2022, 12, 31)),
            interval_days: 15,
        };
        let p = run.resolve(None, Some(d(2022, 7, 1)), None).unwrap();
        assert_eq!(p, RunParams { start: d(2022, 6, 1), end: d(2022, 7, 1), interval_days: 15 });

        let p = run.resolve(Some(d(2022, 1, 1)), None, Some(7)).unwrap();
        assert_eq!(p.start, d(2022, 1, 1));
        assert_eq!(p.interval_days, 7);
    }

    #[test]
    fn test_scraper_config_validation() {
        let mut cfg = ScraperConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timeout(), Duration::from_secs(10));

        cfg.timeout_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));

        cfg.timeout_secs = 5;
        cfg.webdriver_url = "localhost 9515".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidUrl { field: "webdriver_url", .. })
        ));
    }

    #[test]
    fn test_output_paths() {
        let out = OutputConfig::in_dir("/tmp/brvm");
        assert_eq!(out.temp_path(), PathBuf::from("/tmp/brvm/stock_data_temp.csv"));
        assert_eq!(out.final_path(), PathBuf::from("/tmp/brvm/stock_data.csv"));
        assert_eq!(out.fallback_path(), PathBuf::from("/tmp/brvm/stock_data_fallback.csv"));
    }
}
