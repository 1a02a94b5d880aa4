//! Shared utilities

pub mod media;
pub mod rate_limit;
pub mod time;
