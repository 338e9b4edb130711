//! Upstream API clients.
//!
//! - `CourierClient`: the courier's mobile-app REST API (account lookup,
//!   deliveries, rounds)
//! - `CognitoClient`: the identity pool the app logs in against, via SRP
//! - `UpstreamIdentity`: both of the above behind the `IdentityProvider`
//!   trait the session cache depends on
//!
//! Every client goes through a `Transport`, which carries the header set
//! the upstream expects and retries transient failures with exponential
//! backoff.

pub mod cognito;
pub mod courier;
pub mod error;
pub mod identity;
pub mod srp;
pub mod transport;

#[cfg(test)]
pub(crate) mod stub_server;

pub use cognito::CognitoClient;
pub use courier::{CourierClient, FetchWindow};
pub use error::ApiError;
pub use identity::{IdentityError, IdentityProvider, TokenGrant, UpstreamIdentity};
pub use transport::{RetryPolicy, Transport};
