//! Upstream session management for connected accounts.
//!
//! This module provides:
//! - `SessionCache`: serves bearer tokens from cache, refresh or a full login
//! - `SessionTokens`: the cached token triple and its expiry
//! - `CredentialStore`: per-account upstream email, encrypted password and
//!   external id
//! - `PasswordCipher`: sealing of stored passwords
//!
//! Cached sessions live for 15 minutes and are not served during the last 5.

pub mod cache;
pub mod credentials;
pub mod crypto;
pub mod session;

pub use cache::{forget_account, SessionCache, SessionError};
pub use credentials::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredCredentials,
};
pub use crypto::{CipherError, PasswordCipher};
pub use session::SessionTokens;
