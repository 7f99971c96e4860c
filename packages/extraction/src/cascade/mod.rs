//! Extraction cascade: per-field strategy chains over prepared sources.

pub mod engine;
pub mod lookup;
pub mod sources;

pub use engine::CascadeEngine;
pub use lookup::{DetailLookup, UpstreamDetail};
pub use sources::{PreparedSource, PreparedSources, DESCRIPTION_LOCATOR, LISTING_LOCATOR};
