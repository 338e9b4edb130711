//! Cognito user pool client: SRP login, token refresh and the `GetUser`
//! call the courier app makes to finish a login.

use std::collections::HashMap;

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::identity::{IdentityError, TokenGrant};
use super::srp::{SrpSession, VerifierChallenge};
use super::transport::{identity_headers, Transport};
use super::ApiError;
use crate::config::{CognitoSettings, HttpSettings};

/// Lifetime Cognito reports for access tokens when a response omits it.
const DEFAULT_EXPIRES_IN_SECS: i64 = 900;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
    #[serde(default)]
    challenge_parameters: HashMap<String, String>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CognitoErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default)]
    message: Option<String>,
}

/// Error types Cognito returns with HTTP 400 that clear up on retry.
const TRANSIENT_ERROR_TYPES: &[&str] = &[
    "TooManyRequestsException",
    "LimitExceededException",
    "InternalErrorException",
];

/// `__type` (namespace stripped) and message of a Cognito error body.
fn error_body(body: &str) -> (String, String) {
    match serde_json::from_str::<CognitoErrorBody>(body) {
        Ok(b) => {
            let kind = b.kind.rsplit('#').next().unwrap_or_default().to_string();
            (kind, b.message.unwrap_or_default())
        }
        Err(_) => (String::new(), body.to_string()),
    }
}

/// Cognito throttles with HTTP 400 rather than 429.
fn is_retryable(e: &ApiError) -> bool {
    match e {
        ApiError::BadRequest(body) => TRANSIENT_ERROR_TYPES.contains(&error_body(body).0.as_str()),
        other => other.is_transient(),
    }
}

/// Which call an error came from; refresh rejections mean something
/// different from login rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Login,
    Refresh,
}

/// Map a Cognito error response to the identity taxonomy.
fn classify_error(e: ApiError, flow: Flow) -> IdentityError {
    let body = match &e {
        ApiError::BadRequest(body) => body.as_str(),
        _ => return IdentityError::UpstreamUnavailable(e.to_string()),
    };
    let (kind, message) = error_body(body);

    match (kind.as_str(), flow) {
        ("NotAuthorizedException", Flow::Refresh) => IdentityError::InvalidRefreshToken(message),
        ("NotAuthorizedException" | "UserNotFoundException", Flow::Login) => {
            IdentityError::InvalidCredentials(message)
        }
        ("PasswordResetRequiredException", _) => IdentityError::PasswordResetRequired,
        ("UserNotConfirmedException", _) => IdentityError::InvalidCredentials(message),
        (kind, _) if TRANSIENT_ERROR_TYPES.contains(&kind) => {
            IdentityError::UpstreamUnavailable(message)
        }
        (_, Flow::Refresh) => IdentityError::InvalidRefreshToken(format!("{} {}", kind, message)),
        (_, Flow::Login) => IdentityError::UpstreamUnavailable(format!("{} {}", kind, message)),
    }
}

/// Map an unexpected challenge to the identity taxonomy.
fn classify_challenge(name: &str) -> IdentityError {
    match name {
        "SMS_MFA" | "SOFTWARE_TOKEN_MFA" | "MFA_SETUP" | "SELECT_MFA_TYPE" => {
            IdentityError::MfaRequired
        }
        "NEW_PASSWORD_REQUIRED" => IdentityError::PasswordResetRequired,
        other => IdentityError::UpstreamUnavailable(format!("unsupported challenge {}", other)),
    }
}

fn challenge_param(
    params: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, IdentityError> {
    params.get(key).cloned().ok_or_else(|| {
        IdentityError::UpstreamUnavailable(format!("challenge is missing {}", key))
    })
}

impl AuthenticationResult {
    fn into_grant(self, fallback_refresh: Option<&str>) -> Result<TokenGrant, IdentityError> {
        let refresh_token = self
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| {
                IdentityError::UpstreamUnavailable("authentication result has no refresh token".into())
            })?;
        Ok(TokenGrant {
            access_token: self.access_token,
            id_token: self.id_token.unwrap_or_default(),
            refresh_token,
            expires_in_secs: self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }
}

/// Cognito client for the courier app's user pool.
#[derive(Clone)]
pub struct CognitoClient {
    transport: Transport,
    settings: CognitoSettings,
}

impl CognitoClient {
    pub fn new(settings: CognitoSettings, http: &HttpSettings) -> Result<Self, ApiError> {
        let endpoint = settings.endpoint();
        Self::with_endpoint(settings, &endpoint, http)
    }

    /// Client for a pool served from somewhere other than the regional
    /// AWS endpoint.
    pub fn with_endpoint(
        settings: CognitoSettings,
        endpoint: &str,
        http: &HttpSettings,
    ) -> Result<Self, ApiError> {
        let transport = Transport::new(endpoint, identity_headers()?, http)?;
        Ok(Self {
            transport,
            settings,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        target: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let amz_target = format!("{}.{}", TARGET_PREFIX, target);
        self.transport
            .send_json_when(
                target,
                |t| {
                    t.request(Method::POST, "/")
                        .header("x-amz-target", amz_target.as_str())
                        .body(body.to_string())
                },
                is_retryable,
            )
            .await
    }

    /// Full SRP login for an external account id.
    pub async fn authenticate(
        &self,
        external_id: &str,
        password: &str,
    ) -> Result<TokenGrant, IdentityError> {
        let srp = SrpSession::new(self.settings.pool_name());

        let initiate = json!({
            "AuthFlow": "USER_SRP_AUTH",
            "ClientId": self.settings.client_id,
            "AuthParameters": {
                "USERNAME": external_id,
                "SRP_A": srp.public_a_hex(),
            },
            "ClientMetadata": {},
        });
        let response: AuthResponse = self
            .call("InitiateAuth", &initiate)
            .await
            .map_err(|e| classify_error(e, Flow::Login))?;

        match response.challenge_name.as_deref() {
            Some("PASSWORD_VERIFIER") => {}
            Some(other) => return Err(classify_challenge(other)),
            None => {
                return Err(IdentityError::UpstreamUnavailable(
                    "InitiateAuth returned no challenge".into(),
                ))
            }
        }

        let params = &response.challenge_parameters;
        let challenge = VerifierChallenge {
            user_id: challenge_param(params, "USER_ID_FOR_SRP")?,
            salt_hex: challenge_param(params, "SALT")?,
            server_b_hex: challenge_param(params, "SRP_B")?,
            secret_block: challenge_param(params, "SECRET_BLOCK")?,
        };
        let username = params
            .get("USERNAME")
            .cloned()
            .unwrap_or_else(|| challenge.user_id.clone());

        let claim = srp
            .respond(&challenge, password, Utc::now())
            .map_err(|e| IdentityError::UpstreamUnavailable(e.to_string()))?;

        let mut respond = json!({
            "ChallengeName": "PASSWORD_VERIFIER",
            "ClientId": self.settings.client_id,
            "ChallengeResponses": {
                "USERNAME": username,
                "PASSWORD_CLAIM_SECRET_BLOCK": challenge.secret_block,
                "TIMESTAMP": claim.timestamp,
                "PASSWORD_CLAIM_SIGNATURE": claim.signature,
            },
            "ClientMetadata": {},
        });
        if let Some(session) = response.session {
            respond["Session"] = json!(session);
        }

        let result: AuthResponse = self
            .call("RespondToAuthChallenge", &respond)
            .await
            .map_err(|e| classify_error(e, Flow::Login))?;

        if let Some(name) = result.challenge_name.as_deref() {
            return Err(classify_challenge(name));
        }
        let grant = result
            .authentication_result
            .ok_or_else(|| IdentityError::UpstreamUnavailable("no authentication result".into()))?
            .into_grant(None)?;

        // the app always follows a login with GetUser
        let _user: serde_json::Value = self
            .call("GetUser", &json!({ "AccessToken": grant.access_token }))
            .await
            .map_err(|e| classify_error(e, Flow::Login))?;

        info!(external_id, "Identity login succeeded");
        Ok(grant)
    }

    /// Exchange a refresh token for a new token triple.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, IdentityError> {
        let body = json!({
            "AuthFlow": "REFRESH_TOKEN_AUTH",
            "ClientId": self.settings.client_id,
            "AuthParameters": {
                "REFRESH_TOKEN": refresh_token,
            },
        });
        let response: AuthResponse = self
            .call("InitiateAuth", &body)
            .await
            .map_err(|e| classify_error(e, Flow::Refresh))?;

        let grant = response
            .authentication_result
            .ok_or_else(|| IdentityError::InvalidRefreshToken("no authentication result".into()))?
            .into_grant(Some(refresh_token))?;
        debug!("Identity refresh succeeded");
        Ok(grant)
    }
}
