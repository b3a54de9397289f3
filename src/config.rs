//! Configuration loader: merges .env, config.toml and environment variables.

use axum::http::HeaderValue;
use common::config::AppConfig;
use common::{Error, RouteSpec};
use refresh_engine::MAX_WINDOW_MONTHS;
use std::path::{Path, PathBuf};

fn parse_positive<T>(raw: &str, env_name: &str) -> Result<T, Error>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed = raw
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= T::default() {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.search.origins.is_empty() {
        issues.push("search.origins must contain at least one airport".into());
    }
    if config.search.destinations.is_empty() {
        issues.push("search.destinations must contain at least one airport".into());
    }
    if !config.search.origins.is_empty()
        && !config.search.destinations.is_empty()
        && RouteSpec::cross_product(&config.search.origins, &config.search.destinations).is_empty()
    {
        issues.push(
            "search.origins and search.destinations must form at least one route \
             with different endpoints"
                .into(),
        );
    }
    if config.search.window_months > MAX_WINDOW_MONTHS {
        issues.push(format!(
            "search.window_months must be <= {MAX_WINDOW_MONTHS}"
        ));
    }
    if config.search.top_k == 0 {
        issues.push("search.top_k must be > 0".into());
    }

    if config.refresh.max_concurrency == 0 {
        issues.push("refresh.max_concurrency must be > 0".into());
    }
    if config.refresh.interval_secs == 0 {
        issues.push("refresh.interval_secs must be > 0".into());
    }

    if config.upstream.base_url.trim().is_empty() {
        issues.push("upstream.base_url must not be empty".into());
    }
    for (name, value) in [
        ("upstream.market", &config.upstream.market),
        ("upstream.currency", &config.upstream.currency),
        ("upstream.locale", &config.upstream.locale),
    ] {
        if value.trim().is_empty() || value.contains('/') {
            issues.push(format!("{name} must be a non-empty path segment"));
        }
    }
    if config.upstream.max_attempts == 0 {
        issues.push("upstream.max_attempts must be > 0".into());
    }
    if config.upstream.request_timeout_secs == 0 {
        issues.push("upstream.request_timeout_secs must be > 0".into());
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        issues.push(format!(
            "server.bind must be a socket address, got {:?}",
            config.server.bind
        ));
    }
    for origin in &config.server.cors_origins {
        if HeaderValue::from_str(origin).is_err() || origin.trim().is_empty() {
            issues.push(format!("server.cors_origins contains an invalid origin {origin:?}"));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` is `std::env::var` outside tests.
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("FARE_API_KEY") {
        config.upstream.api_key = key;
    }
    if let Some(port) = lookup("PORT") {
        let port: u16 = parse_positive(&port, "PORT")?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".into());
        config.server.bind = format!("{host}:{port}");
    }
    if let Some(raw) = lookup("FARE_MAX_CONCURRENCY") {
        config.refresh.max_concurrency = parse_positive(&raw, "FARE_MAX_CONCURRENCY")?;
    }
    if let Some(raw) = lookup("FARE_WINDOW_MONTHS") {
        config.search.window_months = parse_non_negative_u32(&raw, "FARE_WINDOW_MONTHS")?;
    }
    if let Some(raw) = lookup("FARE_TOP_K") {
        config.search.top_k = parse_positive(&raw, "FARE_TOP_K")?;
    }
    if let Some(raw) = lookup("FARE_REFRESH_INTERVAL_SECS") {
        config.refresh.interval_secs = parse_positive(&raw, "FARE_REFRESH_INTERVAL_SECS")?;
    }
    if let Some(dir) = lookup("FARE_JOURNAL_DIR") {
        let dir = dir.trim();
        config.journal_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<AppConfig, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration. An explicit `path` must exist; otherwise
/// `config.toml` in the working directory is used when present.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Error> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = Path::new("config.toml");
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                AppConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    if config.upstream.api_key.trim().is_empty() {
        tracing::warn!("FARE_API_KEY is not set; requests are sent without an API key");
    }

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Airport;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn issues(config: &AppConfig) -> String {
        match validate_config(config) {
            Err(Error::Config(message)) => message,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        validate_config(&AppConfig::default()).expect("defaults validate");
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = AppConfig::default();
        config.search.origins.clear();
        config.search.top_k = 0;
        config.search.window_months = MAX_WINDOW_MONTHS + 1;
        config.refresh.max_concurrency = 0;
        config.upstream.market = "P/L".into();

        let message = issues(&config);
        assert!(message.contains("search.origins"));
        assert!(message.contains("search.top_k"));
        assert!(message.contains("search.window_months"));
        assert!(message.contains("refresh.max_concurrency"));
        assert!(message.contains("upstream.market"));
        assert!(!message.contains("search.destinations"));
    }

    #[test]
    fn test_self_routes_only_is_rejected() {
        let mut config = AppConfig::default();
        let waw = Airport::new("WAW", "Poland", "Warsaw").expect("valid");
        config.search.origins = vec![waw.clone()];
        config.search.destinations = vec![waw];

        let message = issues(&config);
        assert!(message.contains("at least one route"));
        assert!(!message.contains("search.origins must contain"));
    }

    #[test]
    fn test_invalid_cors_origin() {
        let mut config = AppConfig::default();
        config.server.cors_origins = vec!["https://fares.example".into(), "bad\norigin".into()];

        let message = issues(&config);
        assert!(message.contains("server.cors_origins"));
        assert!(!message.contains("fares.example"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind = "localhost".into();
        assert!(issues(&config).contains("server.bind"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("FARE_API_KEY", "secret"),
                ("PORT", "8081"),
                ("FARE_MAX_CONCURRENCY", "12"),
                ("FARE_WINDOW_MONTHS", "0"),
                ("FARE_TOP_K", "3"),
                ("FARE_REFRESH_INTERVAL_SECS", "60"),
                ("FARE_JOURNAL_DIR", "/var/lib/fares"),
            ]),
        )
        .expect("overrides apply");

        assert_eq!(config.upstream.api_key, "secret");
        assert_eq!(config.server.bind, "0.0.0.0:8081");
        assert_eq!(config.refresh.max_concurrency, 12);
        assert_eq!(config.search.window_months, 0);
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.refresh.interval_secs, 60);
        assert_eq!(config.journal_dir, Some(PathBuf::from("/var/lib/fares")));
    }

    #[test]
    fn test_env_override_rejects_bad_numbers() {
        for (name, value) in [
            ("FARE_MAX_CONCURRENCY", "0"),
            ("FARE_TOP_K", "five"),
            ("PORT", "-1"),
            ("FARE_WINDOW_MONTHS", "-3"),
        ] {
            let mut config = AppConfig::default();
            let result = apply_env_overrides(&mut config, env(&[(name, value)]));
            assert!(
                matches!(result, Err(Error::Config(ref msg)) if msg.contains(name)),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fares.toml");
        std::fs::write(
            &path,
            r#"
[search]
window_months = 2
top_k = 1
group_by = "destination_country"
origins = [{ iata = "POZ", country = "Poland", city = "Poznań" }]
destinations = [{ iata = "BKK", country = "Thailand", city = "Bangkok" }]

[refresh]
max_concurrency = 2
"#,
        )
        .expect("write config");

        let config = read_config_file(&path).expect("parses");
        assert_eq!(config.search.window_months, 2);
        assert_eq!(config.search.top_k, 1);
        assert_eq!(config.search.origins.len(), 1);
        assert_eq!(config.refresh.max_concurrency, 2);
        assert_eq!(config.refresh.interval_secs, 900);
        validate_config(&config).expect("valid");
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let result = read_config_file(Path::new("/nonexistent/fares.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
