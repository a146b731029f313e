//! Persistent caches shared across requests
//!
//! # Layout
//!
//! | Cache | Keyed by | Contents |
//! |-------|----------|----------|
//! | Output | SHA256 of the trimmed source | One JSON [`CacheEntry`] per hash |
//! | Template | nothing, one per config | Prebuilt dependency artifacts |
//!
//! Both survive restarts. The output cache is purely an optimization: every
//! failure is reported through [`crate::error::BestEffort`] and never changes
//! the outcome of a request.

pub mod output;
pub mod template;

pub use output::{content_hash, CacheEntry, CacheStats, OutputCache};
pub use template::{TemplateCache, TemplateState};
