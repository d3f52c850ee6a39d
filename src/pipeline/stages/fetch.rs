use crate::error::{StagelineError, StagelineResult};
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::{Stage, StageDescriptor, StageOutput};
use crate::state::StateView;
use async_trait::async_trait;
use handlebars::Handlebars;
use reqwest::StatusCode;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use url::Url;

const URL_TEMPLATE: &str = "url";

/// Exponential backoff between attempts of a transient operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Failure of a single attempt
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying (connection failures, timeouts, 5xx, 429)
    Transient(StagelineError),
    /// Retrying cannot help
    Permanent(StagelineError),
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> StagelineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(e)) => return Err(e),
            Err(AttemptError::Transient(e)) if attempt >= max_attempts => {
                LOGGER.log(
                    LogLevel::Error,
                    &format!("{} failed after {} attempts: {}", label, attempt, e),
                    "pipeline::fetch",
                );
                return Err(e);
            }
            Err(AttemptError::Transient(e)) => {
                let delay = policy.backoff_for(attempt);
                LOGGER.log(
                    LogLevel::Warn,
                    &format!(
                        "{} attempt {}/{} failed: {}; retrying in {}ms",
                        label,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    ),
                    "pipeline::fetch",
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn classify(error: reqwest::Error) -> AttemptError {
    if error.is_timeout() || error.is_connect() {
        AttemptError::Transient(StagelineError::Http(error))
    } else {
        AttemptError::Permanent(StagelineError::Http(error))
    }
}

/// Stage that GETs a JSON document from an external service
///
/// The URL is a Handlebars template rendered against the run's state in
/// strict mode; substituted values are query-encoded. Retries and the
/// per-request timeout happen inside the stage, so the runner only sees the
/// final outcome.
///
/// # Example
/// ```
/// use stageline::pipeline::stages::{HttpFetchStage, RetryPolicy};
/// use std::time::Duration;
///
/// let stage = HttpFetchStage::new(
///     "fetch",
///     "raw_data",
///     "https://places.example.com/search?q={{business_type}}&near={{target_location}}",
/// )
/// .unwrap()
/// .requires(["business_type", "target_location"])
/// .select("/results")
/// .timeout(Duration::from_secs(10))
/// .retry(RetryPolicy::default());
/// ```
pub struct HttpFetchStage {
    descriptor: StageDescriptor,
    client: reqwest::Client,
    url_template: Handlebars<'static>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    select: Option<String>,
}

impl HttpFetchStage {
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        url_template: &str,
    ) -> StagelineResult<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(|value: &str| {
            url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>()
        });
        registry.register_template_string(URL_TEMPLATE, url_template)?;

        Ok(Self {
            descriptor: StageDescriptor::new(name, output_key),
            client: reqwest::Client::new(),
            url_template: registry,
            headers: Vec::new(),
            timeout: None,
            retry: RetryPolicy::default(),
            select: None,
        })
    }

    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor = self.descriptor.requires(keys);
        self
    }

    /// Use a preconfigured client (proxies, TLS roots, default headers)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Per-attempt request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Keep only the part of the response at this JSON pointer
    pub fn select(mut self, pointer: impl Into<String>) -> Self {
        self.select = Some(pointer.into());
        self
    }

    fn build_url(&self, state: &StateView) -> StagelineResult<Url> {
        let data = state.snapshot()?.to_json();
        let rendered = self.url_template.render(URL_TEMPLATE, &data)?;
        Url::parse(&rendered)
            .map_err(|e| StagelineError::External(format!("invalid URL '{}': {}", rendered, e)))
    }

    async fn fetch_once(&self, url: Url) -> Result<Value, AttemptError> {
        let target = url.to_string();

        let mut request = self.client.get(url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Transient(StagelineError::External(format!(
                "GET {} returned {}",
                target, status
            ))));
        }
        if !status.is_success() {
            return Err(AttemptError::Permanent(StagelineError::External(format!(
                "GET {} returned {}",
                target, status
            ))));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AttemptError::Permanent(StagelineError::Http(e)))
    }
}

#[async_trait]
impl Stage for HttpFetchStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &StateView) -> StagelineResult<StageOutput> {
        let url = self.build_url(state)?;

        LOGGER.log(
            LogLevel::Info,
            &format!("Fetching {} for stage '{}'", url, self.descriptor.name),
            "pipeline::fetch",
        );

        let label = format!("GET {}", url);
        let this = self;
        let body = retry_with_backoff(&self.retry, &label, move |_attempt| {
            this.fetch_once(url.clone())
        })
        .await?;

        match &self.select {
            Some(pointer) => body
                .pointer(pointer)
                .cloned()
                .map(StageOutput::new)
                .ok_or_else(|| StagelineError::KeyNotFound(format!("response{}", pointer))),
            None => Ok(StageOutput::new(body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(3), "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AttemptError::Transient(StagelineError::External("busy".into())))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: StagelineResult<()> = retry_with_backoff(&fast_policy(2), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Transient(StagelineError::External("down".into()))) }
        })
        .await;

        assert!(matches!(result, Err(StagelineError::External(msg)) if msg == "down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StagelineResult<()> = retry_with_backoff(&fast_policy(5), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::Permanent(StagelineError::External("404".into()))) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_url_template_encodes_values() {
        let stage = HttpFetchStage::new(
            "fetch",
            "raw",
            "http://localhost/search?q={{business_type}}&near={{location}}",
        )
        .unwrap();
        let store = StateStore::with_inputs([
            ("business_type", json!("coffee shop")),
            ("location", json!("Lisbon & Porto")),
        ])
        .unwrap();

        let url = stage.build_url(&store.view()).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "coffee shop".to_string()),
                ("near".to_string(), "Lisbon & Porto".to_string()),
            ]
        );
    }

    #[test]
    fn test_url_template_missing_key() {
        let stage = HttpFetchStage::new("fetch", "raw", "http://localhost/{{absent}}").unwrap();
        let err = stage.build_url(&StateStore::new().view()).unwrap_err();
        assert!(matches!(err, StagelineError::Template(_)));
    }
}
