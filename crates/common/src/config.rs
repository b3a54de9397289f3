//! Application configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Airport, GroupBy, InboundPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream fare-grid service.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Query space and retention.
    #[serde(default)]
    pub search: SearchConfig,

    /// Refresh schedule and fan-out.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Read API listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Directory for the JSON-lines fare journal (disabled when unset).
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
}

/// Upstream client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Scheme and host of the month-view service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Market segment of the URL (e.g., "PL").
    #[serde(default = "default_market")]
    pub market: String,

    /// Currency prices are quoted in (e.g., "PLN").
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Locale segment of the URL (e.g., "pl-PL").
    #[serde(default = "default_locale")]
    pub locale: String,

    /// API key appended to every request.
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per query, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay before each retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Request pacing across all queries; 0 disables pacing.
    #[serde(default)]
    pub requests_per_second: u32,
}

/// Which queries to issue and how much to keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Departure airports.
    #[serde(default = "default_origins")]
    pub origins: Vec<Airport>,

    /// Arrival airports.
    #[serde(default = "default_destinations")]
    pub destinations: Vec<Airport>,

    /// Rolling window width in months after the current month.
    #[serde(default = "default_window_months")]
    pub window_months: u32,

    #[serde(default)]
    pub inbound_policy: InboundPolicy,

    #[serde(default)]
    pub group_by: GroupBy,

    /// Cheapest results kept per group.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Refresh schedule (all durations in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Interval between scheduled cycles.
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,

    /// Upstream requests allowed in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Cycle deadline; 0 means no deadline.
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Run a cycle as soon as the service starts.
    #[serde(default = "default_true")]
    pub refresh_on_start: bool,
}

/// HTTP listener for the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Browser origins allowed to call the API. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://www.skyscanner.se".into()
}
fn default_market() -> String {
    "PL".into()
}
fn default_currency() -> String {
    "PLN".into()
}
fn default_locale() -> String {
    "pl-PL".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    1000
}

fn default_window_months() -> u32 {
    6
}
fn default_top_k() -> usize {
    5
}

fn default_refresh_interval() -> u64 {
    900
}
fn default_max_concurrency() -> usize {
    5
}
fn default_cycle_timeout() -> u64 {
    1800
}

fn default_bind() -> String {
    "0.0.0.0:3000".into()
}

fn airport(iata: &str, country: &str, city: &str) -> Airport {
    Airport::new(iata, country, city).expect("static IATA code")
}

fn default_origins() -> Vec<Airport> {
    vec![
        airport("POZ", "Poland", "Poznań"),
        airport("KTW", "Poland", "Katowice"),
        airport("WAW", "Poland", "Warsaw"),
        airport("KRK", "Poland", "Kraków"),
        airport("GDA", "Poland", "Gdańsk"),
        airport("BER", "Germany", "Berlin"),
        airport("BUD", "Hungary", "Budapest"),
        airport("VIE", "Austria", "Vienna"),
        airport("PRG", "Czechia", "Prague"),
    ]
}

fn default_destinations() -> Vec<Airport> {
    vec![
        airport("BKK", "Thailand", "Bangkok"),
        airport("HKT", "Thailand", "Phuket"),
        airport("PEK", "China", "Beijing"),
        airport("PVG", "China", "Shanghai"),
        airport("HND", "Japan", "Tokyo"),
        airport("NRT", "Japan", "Tokyo"),
        airport("ICN", "South Korea", "Seoul"),
        airport("SGN", "Vietnam", "Ho Chi Minh City"),
        airport("HAN", "Vietnam", "Hanoi"),
        airport("NQZ", "Kazakhstan", "Astana"),
        airport("ALA", "Kazakhstan", "Almaty"),
        airport("MNL", "Philippines", "Manila"),
        airport("CGK", "Indonesia", "Jakarta"),
        airport("DPS", "Indonesia", "Bali Denpasar"),
        airport("CMB", "Sri Lanka", "Colombo"),
        airport("DEL", "India", "Delhi"),
        airport("MCT", "Oman", "Muscat"),
        airport("DOH", "Qatar", "Doha"),
        airport("DXB", "United Arab Emirates", "Dubai"),
        airport("AUH", "United Arab Emirates", "Abu Dhabi"),
        airport("SIN", "Singapore", "Singapore"),
        airport("TBS", "Georgia", "Tbilisi"),
        airport("KUT", "Georgia", "Kutaisi"),
        airport("GYD", "Azerbaijan", "Baku"),
        airport("IST", "Turkey", "Istanbul"),
        airport("SAW", "Turkey", "Istanbul Sabiha"),
    ]
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            market: default_market(),
            currency: default_currency(),
            locale: default_locale(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            requests_per_second: 0,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            origins: default_origins(),
            destinations: default_destinations(),
            window_months: default_window_months(),
            inbound_policy: InboundPolicy::default(),
            group_by: GroupBy::default(),
            top_k: default_top_k(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            max_concurrency: default_max_concurrency(),
            cycle_timeout_secs: default_cycle_timeout(),
            refresh_on_start: default_true(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            search: SearchConfig::default(),
            refresh: RefreshConfig::default(),
            server: ServerConfig::default(),
            journal_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_search_space() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.search.origins.len(), 9);
        assert_eq!(cfg.search.destinations.len(), 26);
        assert_eq!(cfg.search.top_k, 5);
        assert_eq!(cfg.refresh.max_concurrency, 5);
        assert_eq!(cfg.upstream.max_attempts, 2);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let raw = r#"
            journal_dir = "/tmp/fares"

            [search]
            window_months = 3
            inbound_policy = "same_or_next"
            group_by = "route_month"
            destinations = [{ iata = "bkk", country = "Thailand", city = "Bangkok" }]

            [refresh]
            max_concurrency = 20
        "#;

        let cfg: AppConfig = toml::from_str(raw).expect("config should parse");

        assert_eq!(cfg.search.window_months, 3);
        assert_eq!(cfg.search.inbound_policy, InboundPolicy::SameOrNext);
        assert_eq!(cfg.search.group_by, GroupBy::RouteMonth);
        assert_eq!(cfg.search.destinations.len(), 1);
        assert_eq!(cfg.search.destinations[0].iata.as_str(), "BKK");
        assert_eq!(cfg.search.origins.len(), 9);
        assert_eq!(cfg.refresh.max_concurrency, 20);
        assert_eq!(cfg.refresh.interval_secs, 900);
        assert_eq!(cfg.journal_dir, Some(PathBuf::from("/tmp/fares")));
    }

    #[test]
    fn test_bad_iata_code_is_rejected() {
        let raw = r#"
            [search]
            origins = [{ iata = "WARSAW" }]
        "#;
        assert!(toml::from_str::<AppConfig>(raw).is_err());
    }
}
