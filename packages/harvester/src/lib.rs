//! Scheduled harvester for public auction announcements on PNCP.
//!
//! Each run lists the publication window after the last checkpoint, keeps
//! the announcements the scoring filter accepts, downloads their attachments
//! and runs the extraction cascade before persisting one record per dedup
//! key.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use auction_harvester::{Harvester, HarvestConfig, MemoryStore, PncpClient, PncpDetailLookup};
//!
//! let config = HarvestConfig::default();
//! let client = Arc::new(PncpClient::new(&config)?);
//! let harvester = Harvester::new(
//!     config,
//!     ExtractionConfig::default(),
//!     client.clone(),
//!     Arc::new(PncpDetailLookup::new(client)),
//!     Arc::new(MemoryStore::new()),
//! )?;
//! let entry = harvester.run(chrono::Utc::now()).await;
//! ```

pub mod config;
pub mod error;
pub mod harvester;
pub mod retry;
pub mod sanitize;
pub mod storage;
pub mod testing;
pub mod types;
pub mod upstream;
pub mod window;

pub use config::{AppConfig, DuplicatePolicy, HarvestConfig};
pub use error::{HarvestError, Result, UpstreamError};
pub use harvester::{ExtractionComponents, Harvest, Harvester};
pub use retry::{with_retry, RetryPolicy};
pub use sanitize::{SanitizeEntry, SanitizeMode, SanitizeReport, SanitizeRunner};
pub use storage::{MemoryStore, PostgresStore, Store};
pub use types::{CandidateSummary, HarvestWindow, PersistedRecord, RunCheckpoint, RunLogEntry};
pub use upstream::{Download, ListingPage, PncpClient, PncpDetailLookup, UpstreamClient};
pub use window::next_window;
