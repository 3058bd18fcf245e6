//! Component E: the telemetry summary cache (`spec.md` §4.E).
//!
//! A pull-through, per-slot singleflight cache over two upstream
//! summaries (callback-service and scheduler), built on
//! `tokio::sync::Mutex` rather than the `cached` crate's TTL-cache
//! macros: the TTL/serve-stale shape is the same idea, but the
//! singleflight join and freshness classification need a hand-written
//! critical section.

mod cache;
mod source;

pub use cache::{SummaryCache, SummarySnapshot};
pub use source::{HttpSummarySource, SummarySlot, SummarySource, SummarySourceError};
