//! Month-view fare-grid API client.
//!
//! Executes one calendar request per [`Query`], retries transport failures
//! and non-2xx statuses under a [`RetryPolicy`], validates the body and
//! normalizes it into a [`FetchOutcome`]. Errors never escape `execute`.

pub mod rate_limit;
pub mod response;
pub mod retry;

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use common::config::UpstreamConfig;
use common::{FetchErrorKind, FetchOutcome, Query};
use thiserror::Error;
use tracing::{debug, warn};

pub use rate_limit::RateLimiter;
pub use response::MonthViewResponse;
pub use retry::{RetryPolicy, Retryable};

const PROFILE: &str = "minimalmonthviewgridv2";

/// Anything that can turn a query into an outcome.
///
/// Implemented by [`FareGridClient`]; the refresh engine only depends on this.
#[async_trait]
pub trait FareSource: Send + Sync {
    async fn fetch(&self, query: &Query) -> FetchOutcome;
}

/// Failure of a single attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transport(_) => FetchErrorKind::Transport,
            FetchError::Status { status, .. } => FetchErrorKind::Status(*status),
            FetchError::Malformed(_) => FetchErrorKind::MalformedBody,
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        // A malformed body is deterministic for a given request.
        !matches!(self, FetchError::Malformed(_))
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

/// The request URL carries the API key, so it is stripped before formatting.
fn transport_error(err: reqwest::Error) -> FetchError {
    FetchError::Transport(format_reqwest_error(&err.without_url()))
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 300;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        format!("{}…", compact.chars().take(MAX_CHARS).collect::<String>())
    } else {
        compact
    }
}

/// HTTP client for the month-view calendar endpoint.
#[derive(Debug, Clone)]
pub struct FareGridClient {
    client: reqwest::Client,
    base_url: String,
    market: String,
    currency: String,
    locale: String,
    api_key: String,
    retry: RetryPolicy,
    limiter: Option<RateLimiter>,
}

impl FareGridClient {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self, common::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| {
                common::Error::Http(format!(
                    "failed to build HTTP client: {}",
                    format_reqwest_error(&e)
                ))
            })?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&cfg.base_url),
            market: cfg.market.clone(),
            currency: cfg.currency.clone(),
            locale: cfg.locale.clone(),
            api_key: cfg.api_key.clone(),
            retry: RetryPolicy::new(cfg.max_attempts, Duration::from_millis(cfg.retry_delay_ms)),
            limiter: RateLimiter::per_second(cfg.requests_per_second),
        })
    }

    /// Replace the retry policy taken from config.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Calendar URL without query string; the API key is appended at send time.
    fn url(&self, query: &Query) -> String {
        format!(
            "{}/g/monthviewservice/{}/{}/{}/calendar/{}/{}/{}/{}/",
            self.base_url,
            self.market,
            self.currency,
            self.locale,
            query.route.origin.iata,
            query.route.destination.iata,
            query.months.outbound(),
            query.months.inbound(),
        )
    }

    async fn fetch_once(&self, query: &Query) -> Result<MonthViewResponse, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }

        let url = self.url(query);
        debug!("Fetching month view: {}", url);

        let resp = self
            .client
            .get(&url)
            .query(&[("profile", PROFILE), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: summarize_response_body(&body),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(transport_error)?;

        MonthViewResponse::parse(&body)
    }

    /// Execute one query under the retry policy. Never fails.
    pub async fn execute(&self, query: &Query) -> FetchOutcome {
        let label = query.to_string();
        let result = self
            .retry
            .run(&label, move |_| self.fetch_once(query))
            .await;

        match result {
            Ok(response) => match response.normalize() {
                Some(quote) => {
                    debug!(
                        "Fetched {}: min price {:.2} {}",
                        label, quote.min_price, self.currency
                    );
                    FetchOutcome::Priced {
                        query: query.clone(),
                        quote,
                    }
                }
                None => {
                    debug!("No price available for {}", label);
                    FetchOutcome::NoPrice {
                        query: query.clone(),
                    }
                }
            },
            Err(e) => {
                warn!("Giving up on {}: {}", label, e);
                FetchOutcome::Failed {
                    query: query.clone(),
                    error: e.kind(),
                }
            }
        }
    }
}

#[async_trait]
impl FareSource for FareGridClient {
    async fn fetch(&self, query: &Query) -> FetchOutcome {
        self.execute(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::Router;
    use common::{Airport, MonthPair, RouteSpec};

    #[derive(Clone)]
    struct Stub {
        hits: Arc<AtomicUsize>,
        responses: Arc<Vec<(StatusCode, &'static str)>>,
        last_uri: Arc<Mutex<Option<String>>>,
    }

    async fn stub_handler(State(stub): State<Stub>, uri: Uri) -> (StatusCode, String) {
        let n = stub.hits.fetch_add(1, Ordering::SeqCst);
        *stub.last_uri.lock().expect("uri lock") = Some(uri.to_string());
        let (status, body) = stub.responses[n.min(stub.responses.len() - 1)];
        (status, body.to_string())
    }

    async fn spawn_stub(responses: Vec<(StatusCode, &'static str)>) -> (String, Stub) {
        let stub = Stub {
            hits: Arc::new(AtomicUsize::new(0)),
            responses: Arc::new(responses),
            last_uri: Arc::new(Mutex::new(None)),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        let app = Router::new().fallback(stub_handler).with_state(stub.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/"), stub)
    }

    fn client_for(base_url: String) -> FareGridClient {
        let cfg = UpstreamConfig {
            base_url,
            api_key: "test-key".into(),
            request_timeout_secs: 5,
            ..UpstreamConfig::default()
        };
        FareGridClient::new(&cfg)
            .expect("client builds")
            .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
    }

    fn sample_query() -> Query {
        Query {
            route: RouteSpec {
                origin: Airport::new("WAW", "Poland", "Warsaw").expect("valid"),
                destination: Airport::new("BKK", "Thailand", "Bangkok").expect("valid"),
            },
            months: MonthPair::new(
                "2026-11".parse().expect("month"),
                "2026-12".parse().expect("month"),
            )
            .expect("ordered"),
        }
    }

    const GRID_BODY: &str = r#"{
        "PriceGrids": {"Grid": [[{"Indirect": {"Price": 2410}}, {"Direct": {"Price": 3190}}]]}
    }"#;

    #[tokio::test]
    async fn test_grid_response_is_priced() {
        let (base, stub) = spawn_stub(vec![(StatusCode::OK, GRID_BODY)]).await;
        let client = client_for(base);

        let outcome = client.execute(&sample_query()).await;

        assert_eq!(outcome.price(), Some(2410.0));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
        let uri = stub.last_uri.lock().expect("uri lock").clone().expect("request seen");
        assert!(uri.starts_with("/g/monthviewservice/PL/PLN/pl-PL/calendar/WAW/BKK/2026-11/2026-12/"));
        assert!(uri.contains("profile=minimalmonthviewgridv2"));
        assert!(uri.contains("apikey=test-key"));
    }

    #[tokio::test]
    async fn test_server_error_then_success_is_retried() {
        let (base, stub) = spawn_stub(vec![
            (StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            (StatusCode::OK, r#"{"MinPrice": 1750}"#),
        ])
        .await;
        let client = client_for(base);

        let outcome = client.execute(&sample_query()).await;

        assert_eq!(outcome.price(), Some(1750.0));
        assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_status_error_becomes_failure() {
        let (base, stub) = spawn_stub(vec![(StatusCode::SERVICE_UNAVAILABLE, "busy")]).await;
        let client = client_for(base);

        let outcome = client.execute(&sample_query()).await;

        match outcome {
            FetchOutcome::Failed { error, .. } => assert_eq!(error, FetchErrorKind::Status(503)),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_retried() {
        let (base, stub) = spawn_stub(vec![(StatusCode::OK, "<html>captcha</html>")]).await;
        let client = client_for(base);

        let outcome = client.execute(&sample_query()).await;

        match outcome {
            FetchOutcome::Failed { error, .. } => assert_eq!(error, FetchErrorKind::MalformedBody),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_price_is_not_an_error() {
        let (base, _stub) = spawn_stub(vec![(StatusCode::OK, r#"{"MinPrice": null}"#)]).await;
        let client = client_for(base);

        let outcome = client.execute(&sample_query()).await;

        assert!(matches!(outcome, FetchOutcome::NoPrice { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = client_for(format!("http://{addr}"));

        let outcome = client.execute(&sample_query()).await;

        match outcome {
            FetchOutcome::Failed { error, .. } => assert_eq!(error, FetchErrorKind::Transport),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let cfg = UpstreamConfig {
            base_url: format!("http://{addr}"),
            api_key: "SECRET-KEY-123".into(),
            request_timeout_secs: 5,
            ..UpstreamConfig::default()
        };
        let client = FareGridClient::new(&cfg).expect("client builds");

        let err = client
            .fetch_once(&sample_query())
            .await
            .expect_err("nothing listens on the port");

        assert!(matches!(err, FetchError::Transport(_)));
        let message = err.to_string();
        assert!(!message.contains("SECRET-KEY-123"), "key leaked: {message}");
        assert!(!message.contains("apikey"), "query leaked: {message}");
    }

    #[test]
    fn test_summarize_truncates_on_char_boundary() {
        let long = "ż".repeat(400);
        let summary = summarize_response_body(&long);
        assert_eq!(summary.chars().count(), 301);
        assert_eq!(summarize_response_body("a\nb"), "a b");
    }
}
