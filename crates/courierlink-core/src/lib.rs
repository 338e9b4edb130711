//! courierlink core library.
//!
//! Keeps per-account sessions with the courier's upstream identity provider
//! and pulls delivery data on a schedule:
//!
//! - `api`: courier API client, Cognito SRP login, retrying transport
//! - `auth`: the session cache, stored credentials and password sealing
//! - `cache`: token store and per-account data snapshots
//! - `sync`: daily sync jobs, their log, and the scheduler
//! - `config`: file and environment configuration

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod sync;
pub mod utils;

pub use auth::{SessionCache, SessionError};
pub use config::{Config, ConnectPolicy};
