//! Message and node filtering
//!
//! A [`FilterPolicy`] is loaded once from an XML document by
//! [`FilterLoader`] and is read-only afterwards.

pub mod loader;
pub mod policy;

pub use loader::FilterLoader;
pub use policy::{
    BranchRule, DurationRule, EntityRule, FilterMode, FilterPolicy, MessageVerdict, Provenance,
    ARTIFACT_USER, LEGACY_VERDICT_USER, VERDICT_USER,
};
