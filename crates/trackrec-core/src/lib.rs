pub mod config;
pub mod dedupe;
pub mod metadata;
pub mod platform;
pub mod status;
