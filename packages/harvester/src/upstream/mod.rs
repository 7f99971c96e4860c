//! Upstream procurement API seam.

pub mod pncp;

use async_trait::async_trait;
use auction_extraction::{ArtifactRef, CandidateRecord};

use crate::error::Result;
use crate::types::HarvestWindow;

pub use pncp::{PncpClient, PncpDetailLookup};

/// One page of the publication listing.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub candidates: Vec<CandidateRecord>,
    pub page: u32,
    pub total_pages: u32,
}

impl ListingPage {
    pub fn empty(page: u32) -> Self {
        Self {
            candidates: Vec::new(),
            page,
            total_pages: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.total_pages
    }
}

/// Bytes of one downloaded attachment.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    /// `Content-Type` as sent by the server
    pub content_type: Option<String>,
}

/// Listing and file access. Implementations retry and rate-limit internally;
/// an error returned here is final.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Page `page` (1-based) of announcements published in `window` for one modality.
    async fn list_page(&self, modality: u32, window: &HarvestWindow, page: u32) -> Result<ListingPage>;

    /// Attachment references of an announcement.
    async fn list_artifacts(&self, candidate: &CandidateRecord) -> Result<Vec<ArtifactRef>>;

    async fn download(&self, artifact: &ArtifactRef) -> Result<Download>;
}
