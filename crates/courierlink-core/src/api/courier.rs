//! Client for the courier's mobile-app REST API.
//!
//! Account lookup is unauthenticated; the data endpoints take the access
//! token obtained from the identity provider as a bearer token.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::identity::IdentityError;
use super::transport::{courier_headers, Transport};
use super::ApiError;
use crate::config::HttpSettings;
use crate::models::{DeliveriesResponse, Delivery, Round, RoundsResponse};

#[derive(Debug, Deserialize)]
struct UserLookupResponse {
    #[serde(rename = "uniqueId", default)]
    unique_id: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl UserLookupResponse {
    /// `uniqueId` is preferred; older responses only carry `id`.
    fn external_id(self) -> Option<String> {
        self.unique_id.filter(|s| !s.is_empty()).or_else(|| match self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

/// Date range for a data fetch.
#[derive(Debug, Clone)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// The `days` days leading up to now.
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("startDate", self.start.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("endDate", self.end.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ]
    }
}

/// Courier API client.
/// Clone is cheap - the underlying transport shares its connection pool.
#[derive(Clone)]
pub struct CourierClient {
    transport: Transport,
}

impl CourierClient {
    pub fn new(base_url: &str, http: &HttpSettings) -> Result<Self, ApiError> {
        let transport = Transport::new(base_url, courier_headers()?, http)?;
        Ok(Self { transport })
    }

    /// Look up the courier's external account id from their login email.
    pub async fn resolve_account_id(&self, email: &str) -> Result<String, IdentityError> {
        let body = json!({
            "signUpSource": "ANDROID",
            "email": email,
            "courierId": "",
            "isOnboarding": true,
        });

        let response: UserLookupResponse = self
            .transport
            .send_json("resolve_account_id", |t| {
                t.request(Method::POST, "/auth-api/v1/user").json(&body)
            })
            .await
            .map_err(|e| match e {
                ApiError::NotFound(_) | ApiError::BadRequest(_) | ApiError::AccessDenied(_) => {
                    IdentityError::AccountNotFound(email.to_string())
                }
                other => IdentityError::UpstreamUnavailable(other.to_string()),
            })?;

        let external_id = response
            .external_id()
            .ok_or_else(|| IdentityError::AccountNotFound(email.to_string()))?;
        debug!(external_id = %external_id, "Resolved upstream account id");
        Ok(external_id)
    }

    /// Fetch deliveries in the given window
    pub async fn fetch_deliveries(
        &self,
        token: &str,
        window: &FetchWindow,
    ) -> Result<Vec<Delivery>, ApiError> {
        let query = window.query();
        let response: DeliveriesResponse = self
            .transport
            .send_json("fetch_deliveries", |t| {
                t.request(Method::GET, "/delivery-api/v1/deliveries")
                    .bearer_auth(token)
                    .query(&query)
            })
            .await?;
        Ok(response.into_deliveries())
    }

    /// Fetch rounds in the given window
    pub async fn fetch_rounds(&self, token: &str, window: &FetchWindow) -> Result<Vec<Round>, ApiError> {
        let query = window.query();
        let response: RoundsResponse = self
            .transport
            .send_json("fetch_rounds", |t| {
                t.request(Method::GET, "/round-api/v1/rounds")
                    .bearer_auth(token)
                    .query(&query)
            })
            .await?;
        Ok(response.into_rounds())
    }

    /// Fetch a single delivery by id
    pub async fn fetch_delivery(&self, token: &str, delivery_id: &str) -> Result<Delivery, ApiError> {
        let path = format!("/delivery-api/v1/deliveries/{}", delivery_id);
        self.transport
            .send_json("fetch_delivery", |t| {
                t.request(Method::GET, &path).bearer_auth(token)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub_server::{fast_http, StubServer};

    #[test]
    fn test_external_id_prefers_unique_id() {
        let r: UserLookupResponse =
            serde_json::from_str(r#"{"uniqueId": "u-123", "id": 55}"#).expect("parse");
        assert_eq!(r.external_id().as_deref(), Some("u-123"));
    }

    #[test]
    fn test_external_id_falls_back_to_id() {
        let r: UserLookupResponse = serde_json::from_str(r#"{"id": 55}"#).expect("parse");
        assert_eq!(r.external_id().as_deref(), Some("55"));

        let r: UserLookupResponse =
            serde_json::from_str(r#"{"uniqueId": "", "id": "abc"}"#).expect("parse");
        assert_eq!(r.external_id().as_deref(), Some("abc"));
    }

    #[test]
    fn test_external_id_missing() {
        let r: UserLookupResponse =
            serde_json::from_str(r#"{"email": "a@b.c"}"#).expect("parse");
        assert!(r.external_id().is_none());
    }

    #[test]
    fn test_fetch_window_query() {
        let window = FetchWindow {
            start: DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
                .expect("date")
                .with_timezone(&Utc),
            end: DateTime::parse_from_rfc3339("2024-03-08T00:00:00Z")
                .expect("date")
                .with_timezone(&Utc),
        };
        let query = window.query();
        assert_eq!(query[0], ("startDate", "2024-03-01T00:00:00.000Z".to_string()));
        assert_eq!(query[1], ("endDate", "2024-03-08T00:00:00.000Z".to_string()));
    }

    fn client(server: &StubServer) -> CourierClient {
        CourierClient::new(&server.url(), &fast_http()).expect("client")
    }

    #[tokio::test]
    async fn test_resolve_account_id_over_http() {
        let server = StubServer::start(vec![(200, r#"{"uniqueId": "u-77"}"#.into())]).await;

        let id = client(&server)
            .resolve_account_id("driver@example.com")
            .await
            .expect("resolve");
        assert_eq!(id, "u-77");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/auth-api/v1/user");
        assert_eq!(requests[0].header("x-requested-with"), Some("com.hermescourier.app"));
        let body = requests[0].json();
        assert_eq!(body["email"], "driver@example.com");
        assert_eq!(body["signUpSource"], "ANDROID");
    }

    #[tokio::test]
    async fn test_resolve_unknown_email_is_not_found() {
        let server = StubServer::start(vec![(404, r#"{"message": "User not found"}"#.into())]).await;

        let err = client(&server)
            .resolve_account_id("nobody@example.com")
            .await
            .unwrap_err();
        assert_eq!(err, IdentityError::AccountNotFound("nobody@example.com".into()));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_server_error_is_unavailable() {
        let server = StubServer::start(vec![
            (503, String::new()),
            (503, String::new()),
            (503, String::new()),
        ])
        .await;

        let err = client(&server)
            .resolve_account_id("driver@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::UpstreamUnavailable(_)));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = StubServer::start(vec![
            (503, r#"{"message": "busy"}"#.into()),
            (200, r#"{"deliveries": [{"id": "d1"}, {"id": "d2"}]}"#.into()),
        ])
        .await;

        let deliveries = client(&server)
            .fetch_deliveries("tok", &FetchWindow::last_days(7))
            .await
            .expect("second attempt succeeds");
        assert_eq!(deliveries.len(), 2);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert_eq!(request.method, "GET");
            assert!(request.path.starts_with("/delivery-api/v1/deliveries?"));
            assert!(request.path.contains("startDate="));
            assert_eq!(request.header("authorization"), Some("Bearer tok"));
        }
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_attempt_budget() {
        let server = StubServer::start(vec![
            (502, String::new()),
            (502, String::new()),
            (502, String::new()),
            (200, "[]".into()),
        ])
        .await;

        let err = client(&server)
            .fetch_rounds("tok", &FetchWindow::last_days(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_unauthorized() {
        let server = StubServer::start(vec![(401, String::new())]).await;

        let err = client(&server)
            .fetch_delivery("expired", "d1")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/delivery-api/v1/deliveries/d1");
    }

    #[test]
    fn test_last_days_window() {
        let window = FetchWindow::last_days(7);
        assert_eq!((window.end - window.start).num_days(), 7);
    }
}
