//! HTTP fetching with bounded retries on timeouts.
//!
//! Every network read in the relay goes through [`PageSource::fetch_page`].
//! The production implementation, [`Fetcher`], issues a GET with the
//! per-attempt timeout dictated by [`RequestPolicy`] and retries only when
//! the attempt timed out.
//!
//! # Retry Strategy
//!
//! - At most `max_retries + 1` attempts
//! - Fixed `retry_delay` between attempts
//! - Each retry raises the timeout: `min(current * 1.5, max_timeout)`
//! - Any non-timeout failure (connection refused, HTTP 404, ...) is returned
//!   immediately
//! - When every attempt timed out, the last timeout error is returned

use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Per-call retry configuration. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    pub max_retries: u32,
    pub initial_timeout: Duration,
    pub max_timeout: Duration,
    /// Pause between a timed-out attempt and the next one.
    pub retry_delay: Duration,
}

impl RequestPolicy {
    /// Timeout for the attempt after one that used `current`.
    pub fn next_timeout(&self, current: Duration) -> Duration {
        current.mul_f64(1.5).min(self.max_timeout)
    }
}

/// Anything that can turn a URL into a document body.
///
/// Implemented by [`Fetcher`] for real traffic and by scripted doubles in
/// tests. The returned future must be `Send` so callers can spawn it onto
/// the worker pools.
pub trait PageSource: Send + Sync + 'static {
    fn fetch_page(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Run `attempt` until it succeeds, fails with a non-timeout error, or the
/// policy's retries are used up.
///
/// `attempt` receives the timeout to apply to that try. The loop only issues
/// attempt N+1 after observing the outcome of attempt N.
///
/// # Arguments
///
/// * `policy` - Retry count, initial and maximum timeout, and the delay
///   between attempts
/// * `attempt` - Called once per try with that try's timeout
///
/// # Returns
///
/// The first successful value, or the error of the last attempt made. Only
/// errors for which [`FetchError::is_timeout`] holds are retried.
pub async fn retry_on_timeout<T, F, Fut>(
    url: &str,
    policy: &RequestPolicy,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut timeout = policy.initial_timeout;
    let mut retries = 0u32;

    loop {
        match attempt(timeout).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_timeout() => {
                if retries >= policy.max_retries {
                    warn!(
                        %url,
                        attempts = retries + 1,
                        timeout_ms = timeout.as_millis() as u64,
                        "All attempts timed out"
                    );
                    return Err(err);
                }
                retries += 1;
                debug!(
                    %url,
                    attempt = retries,
                    timeout_ms = timeout.as_millis() as u64,
                    "Attempt timed out; retrying"
                );
                sleep(policy.retry_delay).await;
                timeout = policy.next_timeout(timeout);
            }
            Err(err) => {
                debug!(%url, error = %err, "Non-retriable fetch failure");
                return Err(err);
            }
        }
    }
}

/// reqwest-backed [`PageSource`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: RequestPolicy,
}

impl Fetcher {
    /// Build a fetcher sending `user_agent` with every request.
    pub fn new(user_agent: &str, policy: RequestPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|source| FetchError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { client, policy })
    }

    /// GET `url` under `policy` and return the body text.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &str, policy: &RequestPolicy) -> Result<String, FetchError> {
        let parsed = url::Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        retry_on_timeout(url, policy, |timeout| {
            let request = self.client.get(parsed.clone()).timeout(timeout);
            async move {
                let timeout_ms = timeout.as_millis() as u64;
                let response = request
                    .send()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, timeout_ms, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                response
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url, timeout_ms, e))
            }
        })
        .await
    }
}

impl PageSource for Fetcher {
    fn fetch_page(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        self.fetch(url, &self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn timeout_err(ms: Duration) -> FetchError {
        FetchError::Timeout {
            url: "https://example.com".into(),
            timeout_ms: ms.as_millis() as u64,
        }
    }

    fn policy(max_retries: u32, initial_ms: u64, max_ms: u64) -> RequestPolicy {
        RequestPolicy {
            max_retries,
            initial_timeout: Duration::from_millis(initial_ms),
            max_timeout: Duration::from_millis(max_ms),
            retry_delay: Duration::from_millis(1000),
        }
    }

    #[test]
    fn next_timeout_grows_by_half_and_caps() {
        let p = policy(3, 1000, 5000);
        assert_eq!(p.next_timeout(Duration::from_millis(1000)), Duration::from_millis(1500));
        assert_eq!(p.next_timeout(Duration::from_millis(4000)), Duration::from_millis(5000));
        assert_eq!(p.next_timeout(Duration::from_millis(5000)), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_never_exceeds_max_timeout_and_stops_after_four_attempts() {
        let p = policy(3, 1000, 5000);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let result: Result<(), _> = retry_on_timeout("https://example.com", &p, |timeout| {
            log.lock().unwrap().push(timeout);
            async move { Err(timeout_err(timeout)) }
        })
        .await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|t| *t <= Duration::from_millis(5000)));
        assert_eq!(
            seen,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
                Duration::from_millis(3375),
            ]
        );
        // The error surfaced is the last attempt's timeout.
        match result {
            Err(FetchError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 3375),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let p = policy(2, 100, 1000);
        let start = tokio::time::Instant::now();
        let _: Result<(), _> =
            retry_on_timeout("https://example.com", &p, |t| async move { Err(timeout_err(t)) })
                .await;
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_a_timeout() {
        let p = policy(3, 100, 1000);
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);

        let result = retry_on_timeout("https://example.com", &p, |t| {
            let n = {
                let mut c = counter.lock().unwrap();
                *c += 1;
                *c
            };
            async move {
                if n == 1 {
                    Err(timeout_err(t))
                } else {
                    Ok("body".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "body");
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_timeout_failure_is_not_retried() {
        let p = policy(3, 100, 1000);
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_on_timeout("https://example.com", &p, |_| {
            *counter.lock().unwrap() += 1;
            async {
                Err(FetchError::Status {
                    url: "https://example.com".into(),
                    status: 404,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn fetcher_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new("Mozilla/5.0", policy(0, 2000, 2000)).unwrap();
        let body = fetcher
            .fetch_page(&format!("{}/rss", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<rss/>");
    }

    #[tokio::test]
    async fn fetcher_does_not_retry_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new("Mozilla/5.0", policy(3, 2000, 2000)).unwrap();
        let result = fetcher
            .fetch_page(&format!("{}/missing", server.uri()))
            .await;
        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn fetcher_retries_slow_responses_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let p = RequestPolicy {
            max_retries: 2,
            initial_timeout: Duration::from_millis(50),
            max_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(10),
        };
        let fetcher = Fetcher::new("Mozilla/5.0", p).unwrap();
        let result = fetcher.fetch_page(&format!("{}/slow", server.uri())).await;
        assert!(matches!(result, Err(FetchError::Timeout { .. })));
    }

    #[tokio::test]
    async fn invalid_url_fails_without_network() {
        let fetcher = Fetcher::new("Mozilla/5.0", policy(3, 100, 100)).unwrap();
        let result = fetcher.fetch_page("not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
