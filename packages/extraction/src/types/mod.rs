//! Data types shared by the cascade, the harvester and the sanitizer.

pub mod candidate;
pub mod config;
pub mod record;
