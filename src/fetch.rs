//! Outbound HTTP with retry: every adapter request goes through here so rate
//! limits and transient server errors are handled in one place.
//!
//! The policy, per request:
//! - 429 waits for `Retry-After` (seconds form) when present, otherwise
//!   2^attempt seconds, and tries again. Exhausting the budget is an error.
//! - 5xx backs off 2^attempt seconds and tries again. On the final attempt
//!   the response is returned as-is for the caller to inspect.
//! - transport errors back off the same way and surface only from the final
//!   attempt.
//! - anything else returns immediately, including 401 and 403; auth recovery
//!   is the adapters' job, not the transport's.

use std::future::Future;
use std::time::Duration;

use crate::error::FetchError;
use crate::model::Platform;

/// Attempts per request, initial try included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A `reqwest::Client` wrapped with the retry policy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Fetcher {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// The underlying client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends `request`, retrying per the policy above.
    ///
    /// The request body must be buffered (`try_clone`-able); a streaming body
    /// cannot be replayed across attempts. Requests built in this crate are
    /// all buffered.
    pub async fn execute(
        &self,
        platform: Platform,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, FetchError> {
        let client = self.client.clone();
        retry_loop(platform, self.max_retries, move |_attempt| {
            let req = request
                .try_clone()
                .expect("retryable requests use buffered bodies");
            let client = client.clone();
            async move { client.execute(req).await }
        })
        .await
    }
}

/// Drives the retry policy over an arbitrary attempt function.
///
/// Split out from [`Fetcher::execute`] so the policy can be exercised with
/// canned responses.
pub(crate) async fn retry_loop<F, Fut>(
    platform: Platform,
    max_retries: u32,
    mut attempt_fn: F,
) -> Result<reqwest::Response, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 0;
    loop {
        let last = attempt + 1 >= max_retries;
        match attempt_fn(attempt).await {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    if last {
                        return Err(FetchError::RetriesExhausted {
                            platform,
                            attempts: max_retries,
                        });
                    }
                    let wait = retry_after(&response).unwrap_or_else(|| backoff(attempt));
                    tracing::warn!(
                        %platform,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                } else if status.is_server_error() {
                    if last {
                        return Ok(response);
                    }
                    let wait = backoff(attempt);
                    tracing::warn!(
                        %platform,
                        status = status.as_u16(),
                        wait_secs = wait.as_secs(),
                        "server error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                } else {
                    return Ok(response);
                }
            }
            Err(source) => {
                if last {
                    return Err(FetchError::Transport { platform, source });
                }
                let wait = backoff(attempt);
                tracing::warn!(
                    %platform,
                    error = %source,
                    wait_secs = wait.as_secs(),
                    "request failed, backing off"
                );
                tokio::time::sleep(wait).await;
            }
        }
        attempt += 1;
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 64s.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

/// Seconds from a `Retry-After` header, where the platform provides one.
/// Only the integer-seconds form is understood; the HTTP-date form falls back
/// to the computed backoff.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let secs: u64 = value.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::ready;

    fn canned(status: u16) -> reqwest::Response {
        reqwest::Response::from(
            http::Response::builder()
                .status(status)
                .body("")
                .unwrap(),
        )
    }

    fn canned_with_retry_after(status: u16, secs: &str) -> reqwest::Response {
        reqwest::Response::from(
            http::Response::builder()
                .status(status)
                .header("retry-after", secs)
                .body("")
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limiting_exhausts_the_budget() {
        let mut calls = 0;
        let result = retry_loop(Platform::Twitch, 3, |_| {
            calls += 1;
            ready(Ok(canned(429)))
        })
        .await;
        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(FetchError::RetriesExhausted {
                platform: Platform::Twitch,
                attempts: 3
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_back_off_then_return_the_last_response() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;
        let result = retry_loop(Platform::YouTube, 3, |_| {
            calls += 1;
            ready(Ok(canned(503)))
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(result.status().as_u16(), 503);
        // Waits 2^0 then 2^1 seconds between the three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_the_computed_backoff() {
        let start = tokio::time::Instant::now();
        let mut responses = VecDeque::from([
            canned_with_retry_after(429, "5"),
            canned(429),
            canned(200),
        ]);
        let result = retry_loop(Platform::Twitch, 3, |_| {
            ready(Ok(responses.pop_front().unwrap()))
        })
        .await
        .unwrap();
        assert_eq!(result.status().as_u16(), 200);
        // 5s from the header, then 2^1 = 2s computed.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_statuses_return_immediately() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;
        let result = retry_loop(Platform::Kick, 3, |_| {
            calls += 1;
            ready(Ok(canned(404)))
        })
        .await
        .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(result.status().as_u16(), 404);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_surface_only_from_the_final_attempt() {
        // Bind a port, then drop the listener so connections are refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = Fetcher::new(reqwest::Client::new());
        let request = fetcher
            .client()
            .get(format!("http://{addr}/"))
            .build()
            .unwrap();
        let start = tokio::time::Instant::now();
        let err = fetcher
            .execute(Platform::TikTok, request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transport {
                platform: Platform::TikTok,
                ..
            }
        ));
        // Two backoffs happened before the error was allowed out.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
