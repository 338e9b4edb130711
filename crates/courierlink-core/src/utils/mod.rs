//! Small formatting helpers shared by the API client, sync jobs and CLI.

pub mod format;

pub use format::{format_elapsed, mask_token, truncate_string};
