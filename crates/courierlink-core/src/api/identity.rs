//! Boundary to the upstream identity provider.
//!
//! The session cache only ever talks to an `IdentityProvider`; the
//! production implementation is `UpstreamIdentity`, which resolves the
//! external account id through the courier API and authenticates against
//! the Cognito pool the courier app uses.

use std::future::Future;

use thiserror::Error;

use super::{ApiError, CognitoClient, CourierClient};

/// Token triple returned by an authentication or refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("No upstream account found for {0}")]
    AccountNotFound(String),

    #[error("Upstream rejected the credentials: {0}")]
    InvalidCredentials(String),

    #[error("Upstream account requires multi-factor authentication")]
    MfaRequired,

    #[error("Upstream account requires a password reset")]
    PasswordResetRequired,

    #[error("Refresh token rejected: {0}")]
    InvalidRefreshToken(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<ApiError> for IdentityError {
    fn from(e: ApiError) -> Self {
        IdentityError::UpstreamUnavailable(e.to_string())
    }
}

/// Operations the session cache needs from the upstream identity system.
pub trait IdentityProvider: Send + Sync {
    fn resolve_account_id(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<String, IdentityError>> + Send;

    fn authenticate(
        &self,
        external_id: &str,
        password: &str,
    ) -> impl Future<Output = Result<TokenGrant, IdentityError>> + Send;

    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenGrant, IdentityError>> + Send;
}

/// Production identity provider: courier API for account lookup, Cognito
/// for the SRP login and refresh.
#[derive(Clone)]
pub struct UpstreamIdentity {
    courier: CourierClient,
    cognito: CognitoClient,
}

impl UpstreamIdentity {
    pub fn new(courier: CourierClient, cognito: CognitoClient) -> Self {
        Self { courier, cognito }
    }
}

impl IdentityProvider for UpstreamIdentity {
    async fn resolve_account_id(&self, email: &str) -> Result<String, IdentityError> {
        self.courier.resolve_account_id(email).await
    }

    async fn authenticate(
        &self,
        external_id: &str,
        password: &str,
    ) -> Result<TokenGrant, IdentityError> {
        self.cognito.authenticate(external_id, password).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError> {
        self.cognito.refresh(refresh_token).await
    }
}
