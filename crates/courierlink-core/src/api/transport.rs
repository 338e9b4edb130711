//! HTTP transport shared by the courier and identity clients.
//!
//! Each upstream gets its own `Transport` carrying a fixed header set, so
//! the mobile-app headers both upstreams expect are injected explicitly
//! per client rather than by patching anything process-wide.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::ApiError;
use crate::config::HttpSettings;

/// User agent of the Android web view the courier app runs in.
const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 14; sdk_gphone64_x86_64 Build/UE1A.230829.050; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/113.0.5672.136 Mobile Safari/537.36";

const APP_PACKAGE: &str = "com.hermescourier.app";

/// Headers sent with every courier API request.
const COURIER_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("content-type", "application/json"),
    ("origin", "https://localhost"),
    ("referer", "https://localhost/"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "cross-site"),
    ("user-agent", MOBILE_USER_AGENT),
    ("x-requested-with", APP_PACKAGE),
];

/// Headers sent with every identity provider request.
const IDENTITY_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "max-age=0"),
    ("content-type", "application/x-amz-json-1.1"),
    ("origin", "https://localhost"),
    ("referer", "https://localhost/"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "cross-site"),
    ("user-agent", MOBILE_USER_AGENT),
    ("x-amz-user-agent", "aws-amplify/5.0.4 js"),
    ("x-requested-with", APP_PACKAGE),
];

fn header_map(pairs: &[(&str, &str)]) -> Result<header::HeaderMap, ApiError> {
    let mut headers = header::HeaderMap::new();
    for (name, value) in pairs {
        let name = header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidResponse(format!("bad header name {}: {}", name, e)))?;
        let value = header::HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidResponse(format!("bad header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub fn courier_headers() -> Result<header::HeaderMap, ApiError> {
    header_map(COURIER_HEADERS)
}

pub fn identity_headers() -> Result<header::HeaderMap, ApiError> {
    header_map(IDENTITY_HEADERS)
}

/// Errors that know whether a retry could help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ApiError {
    fn is_transient(&self) -> bool {
        ApiError::is_transient(self)
    }
}

/// Bounded exponential-backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
        }
    }

    /// Delay before the given retry (1-based: the wait after attempt `n`).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_when(label, op, E::is_transient).await
    }

    /// Like `run`, with the caller deciding which errors are worth a retry.
    pub async fn run_when<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retryable(&e) && attempt < self.max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        call = label,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient upstream failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// An HTTP client bound to one upstream base URL and header set.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl Transport {
    pub fn new(
        base_url: &str,
        headers: header::HeaderMap,
        settings: &HttpSettings,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_settings(settings),
        })
    }

    pub fn url(&self, path: &str) -> String {
        if path.is_empty() || path == "/" {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Send the request built by `build` under the retry policy and decode
    /// a JSON body. `build` is called once per attempt.
    pub async fn send_json<T, F>(&self, label: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Self) -> RequestBuilder,
    {
        self.send_json_when(label, build, ApiError::is_transient).await
    }

    /// `send_json` for upstreams that report some transient failures in a
    /// status `ApiError::is_transient` does not cover.
    pub async fn send_json_when<T, F, R>(
        &self,
        label: &str,
        build: F,
        retryable: R,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Self) -> RequestBuilder,
        R: Fn(&ApiError) -> bool,
    {
        let build = &build;
        let this = self;
        self.retry
            .run_when(
                label,
                move || async move {
                    let response = build(this).send().await?;
                    let response = Self::check_response(response).await?;
                    Ok::<T, ApiError>(response.json::<T>().await?)
                },
                retryable,
            )
            .await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_retries_transient_until_budget_spent() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), ApiError> = instant_policy(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::ServerError("503".into()))
            })
            .await;

        assert!(matches!(result, Err(ApiError::ServerError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), ApiError> = instant_policy(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::BadRequest("NotAuthorizedException".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_decides_what_is_retryable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), ApiError> = instant_policy(3)
            .run_when(
                "test",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::BadRequest("throttled".into()))
                },
                |e| matches!(e, ApiError::BadRequest(body) if body == "throttled"),
            )
            .await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = instant_policy(3)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::RateLimited)
                } else {
                    Ok("ok")
                }
            })
            .await;

        assert_eq!(result.expect("second attempt succeeds"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_header_sets_are_valid() {
        let courier = courier_headers().expect("courier headers");
        assert_eq!(
            courier.get("x-requested-with").map(|v| v.to_str().unwrap_or_default()),
            Some(APP_PACKAGE)
        );
        let identity = identity_headers().expect("identity headers");
        assert!(identity.contains_key("x-amz-user-agent"));
    }

    #[test]
    fn test_url_joining() {
        let transport = Transport::new(
            "https://api.example.com/",
            header::HeaderMap::new(),
            &HttpSettings::default(),
        )
        .expect("transport");
        assert_eq!(transport.url("/rounds"), "https://api.example.com/rounds");
        assert_eq!(transport.url("/"), "https://api.example.com/");
    }
}
