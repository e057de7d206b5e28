//! Service configuration
//!
//! Defaults match the marketplace's behaviour: offers live for seven days and
//! vendor rating aggregates settle two seconds after the last feedback.
//! Override through environment variables with [`BarterConfig::from_env`].

use chrono::Duration;

pub const DEFAULT_OFFER_TTL_HOURS: i64 = 7 * 24;
pub const DEFAULT_RATING_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;
/// Ten years. Expiry timestamps must stay inside the nanosecond range the
/// store encodes, which ends in 2262.
pub const MAX_OFFER_TTL_HOURS: i64 = 10 * 365 * 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarterConfig {
    /// How long a pending offer stays acceptable
    pub offer_ttl: Duration,
    /// Quiet period before a vendor's rating aggregate is recomputed
    pub rating_debounce: std::time::Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for BarterConfig {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::hours(DEFAULT_OFFER_TTL_HOURS),
            rating_debounce: std::time::Duration::from_millis(DEFAULT_RATING_DEBOUNCE_MS),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl BarterConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `BARTER_OFFER_TTL_HOURS` (default: 168)
    /// - `BARTER_RATING_DEBOUNCE_MS` (default: 2000)
    /// - `BARTER_PAGE_SIZE` (default: 10)
    /// - `BARTER_MAX_PAGE_SIZE` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ttl_hours: i64 =
            parse_var(&lookup, "BARTER_OFFER_TTL_HOURS", DEFAULT_OFFER_TTL_HOURS)?;
        if !(1..=MAX_OFFER_TTL_HOURS).contains(&ttl_hours) {
            return Err(ConfigError::OutOfRange(
                "BARTER_OFFER_TTL_HOURS",
                ttl_hours.to_string(),
            ));
        }
        let offer_ttl = Duration::try_hours(ttl_hours).ok_or_else(|| {
            ConfigError::OutOfRange("BARTER_OFFER_TTL_HOURS", ttl_hours.to_string())
        })?;

        let debounce_ms =
            parse_var(&lookup, "BARTER_RATING_DEBOUNCE_MS", DEFAULT_RATING_DEBOUNCE_MS)?;
        let default_page_size = parse_var(&lookup, "BARTER_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let max_page_size = parse_var(&lookup, "BARTER_MAX_PAGE_SIZE", DEFAULT_MAX_PAGE_SIZE)?;

        if default_page_size == 0 {
            return Err(ConfigError::OutOfRange("BARTER_PAGE_SIZE", "0".into()));
        }
        if max_page_size < default_page_size {
            return Err(ConfigError::OutOfRange(
                "BARTER_MAX_PAGE_SIZE",
                max_page_size.to_string(),
            ));
        }

        Ok(Self {
            offer_ttl,
            rating_debounce: std::time::Duration::from_millis(debounce_ms),
            default_page_size,
            max_page_size,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw)),
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: `{1}`")]
    Invalid(&'static str, String),
    #[error("value for {0} is out of range: {1}")]
    OutOfRange(&'static str, String),
}
