//! Typed error taxonomy for the resync write-behind cache engine.
//!
//! One enum enumerates every way a cache operation can fail so callers can
//! match on `CacheError` rather than string-sniff an opaque error. Storage
//! adapter failures are captured as text at the point they occur (see
//! [`capture_source`]) instead of being threaded through as a boxed trait
//! object across thread and lock boundaries.

use std::fmt;

/// Every public operation on the cache returns this `Result` alias.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Admission denied: the entry store is at `maxCacheElementsHardLimit`.
    #[error("cache is full: {count} entries at hard limit {limit}")]
    CacheFull { count: usize, limit: usize },

    /// The operation isn't allowed in the cache's current lifecycle state.
    #[error("operation not allowed while cache control state is {state}")]
    ControlState { state: &'static str },

    /// An internal invariant about entry/queue bookkeeping didn't hold.
    #[error("illegal cache state: {message}")]
    IllegalState { message: String },

    /// The storage adapter returned a state the engine can't make sense of
    /// (e.g. a write acknowledged for a key with no pending write).
    #[error("illegal external (storage) state: {message}")]
    IllegalExternalState { message: String },

    /// The entry exists but its initial read hasn't completed yet, and the
    /// caller asked not to wait (or waited less than the read took).
    #[error("value for key not yet loaded")]
    ElementNotYetLoaded,

    /// The initial read failed permanently after exhausting retries.
    #[error("failed to load value from storage after {attempts} attempt(s){}", format_source(.source))]
    ElementFailedLoading {
        attempts: u32,
        source: Option<String>,
    },

    /// A background resync failed permanently and the configured policy
    /// blocks reads of stale data.
    #[error("background resync failed after {attempts} attempt(s){}", format_source(.source))]
    ElementFailedResync {
        attempts: u32,
        source: Option<String>,
    },

    /// `collect()` would exceed `maxUpdatesToCollect`.
    #[error("too many pending updates collected for entry (limit {limit})")]
    TooManyUpdates { limit: usize },

    /// An assertion failed that should be structurally impossible; logged
    /// at `critical` severity by the caller but not fatal to the process.
    #[error("internal cache invariant violated: {message}")]
    Internal { message: String },

    /// A suspension point (queue wait, lock, latch, storage call) observed
    /// a request to stop.
    #[error("operation interrupted")]
    Interrupted,
}

fn format_source(source: &Option<String>) -> String {
    match source {
        Some(s) => format!(": {s}"),
        None => String::new(),
    }
}

impl CacheError {
    pub fn cache_full(count: usize, limit: usize) -> Self {
        Self::CacheFull { count, limit }
    }

    pub fn control_state(state: &'static str) -> Self {
        Self::ControlState { state }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn illegal_external_state(message: impl Into<String>) -> Self {
        Self::IllegalExternalState {
            message: message.into(),
        }
    }

    pub fn element_failed_loading(attempts: u32, source: Option<impl fmt::Display>) -> Self {
        Self::ElementFailedLoading {
            attempts,
            source: source.map(|s| s.to_string()),
        }
    }

    pub fn element_failed_resync(attempts: u32, source: Option<impl fmt::Display>) -> Self {
        Self::ElementFailedResync {
            attempts,
            source: source.map(|s| s.to_string()),
        }
    }

    pub fn too_many_updates(limit: usize) -> Self {
        Self::TooManyUpdates { limit }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors that represent a terminal, already-recorded failure
    /// rather than a transient condition the caller might retry around.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ElementFailedLoading { .. } | Self::ElementFailedResync { .. }
        )
    }
}

/// Captures a storage adapter error's display text at the point of failure.
///
/// Adapter errors are `Box<dyn Error + Send + Sync>` values produced on a
/// worker thread and must cross into entry payloads guarded by locks that
/// don't otherwise need to know about arbitrary error types; capturing the
/// text once avoids threading a trait object through the whole pipeline.
pub fn capture_source(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(" caused by: ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
