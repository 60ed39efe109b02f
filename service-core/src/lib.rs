//! service-core: Shared infrastructure for the notification pipeline services.
pub mod config;
pub mod error;
pub mod observability;
