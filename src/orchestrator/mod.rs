//! Adaptive transcription orchestrator.
//!
//! - [`state`]: the Normal / Cooldown / PermanentFallback machine that picks
//!   an engine per page
//! - [`checkpoint`]: crash-safe per-job result maps
//! - [`batch`]: the per-job page loop, sharding, concurrent jobs, assembly

pub mod batch;
pub mod checkpoint;
pub mod state;
