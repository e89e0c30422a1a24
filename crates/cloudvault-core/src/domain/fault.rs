//! Fault accumulation for backup and restore runs
//!
//! A [`FaultBus`] is shared across one run and separates three severities:
//!
//! - **Failure** (fatal): cancellation, root enumeration failure, storage
//!   write failure. Setting the failure aborts the run; everything checks
//!   [`FaultBus::failure`] before starting new work.
//! - **Recoverable**: per-item errors. Recorded and the item is omitted;
//!   siblings continue.
//! - **Skips**: expected conditions (deleted in flight, malware flag,
//!   unprocessable format, unresolvable entity). Categorized, surfaced in
//!   the final report, never counted as failures.
//!
//! Recoverable and skip records never unwind the call stack; they ride the
//! bus down the call chain instead.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use super::newtypes::{ItemId, RunId};

// ============================================================================
// Skip records
// ============================================================================

/// Why an item was deliberately left out of the backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Provider flagged the item as malware; content is not downloadable
    Malware,
    /// Item vanished between enumeration and fetch
    NotFound,
    /// Provider cannot produce the content (e.g. a special document format
    /// above the provider's processing ceiling)
    Unprocessable,
    /// Sharing entity no longer exists in the target tenant
    UnresolvableEntity,
    /// Password-protected link share; cannot be recreated faithfully
    PasswordProtectedLink,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malware => write!(f, "malware"),
            SkipReason::NotFound => write!(f, "not_found"),
            SkipReason::Unprocessable => write!(f, "unprocessable"),
            SkipReason::UnresolvableEntity => write!(f, "unresolvable_entity"),
            SkipReason::PasswordProtectedLink => write!(f, "password_protected_link"),
        }
    }
}

/// One skipped item with its reason and enough context for the report
#[derive(Debug, Clone)]
pub struct SkipRecord {
    pub reason: SkipReason,
    pub item_id: Option<ItemId>,
    pub description: String,
}

impl SkipRecord {
    pub fn new(reason: SkipReason, item_id: Option<ItemId>, description: impl Into<String>) -> Self {
        Self {
            reason,
            item_id,
            description: description.into(),
        }
    }
}

// ============================================================================
// FaultBus
// ============================================================================

#[derive(Debug, Default)]
struct FaultData {
    failure: Option<String>,
    recoverable: Vec<String>,
    skipped: Vec<SkipRecord>,
}

/// Shared accumulator for a run's faults
///
/// Cheaply cloneable; all clones share the same state and carry the run's
/// identifier for report correlation.
#[derive(Debug, Clone)]
pub struct FaultBus {
    run_id: RunId,
    inner: Arc<Mutex<FaultData>>,
}

impl Default for FaultBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultBus {
    /// Creates an empty bus for a new run.
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            inner: Arc::default(),
        }
    }

    /// Creates a bus bound to an existing run identifier.
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id,
            inner: Arc::default(),
        }
    }

    /// The run this bus accumulates for.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Records the fatal failure. The first failure wins; later ones are
    /// logged and dropped so the original cause is preserved.
    pub fn fail(&self, err: impl fmt::Display) {
        let mut data = self.inner.lock().unwrap();
        if data.failure.is_none() {
            error!(error = %err, "run failure recorded");
            data.failure = Some(err.to_string());
        } else {
            error!(error = %err, "additional failure after run already failed");
        }
    }

    /// Returns the fatal failure, if one was recorded.
    pub fn failure(&self) -> Option<String> {
        self.inner.lock().unwrap().failure.clone()
    }

    /// Records a recoverable per-item error. The run continues.
    pub fn add_recoverable(&self, err: impl fmt::Display) {
        warn!(error = %err, "recoverable error");
        self.inner.lock().unwrap().recoverable.push(err.to_string());
    }

    /// Records an expected skip.
    pub fn add_skip(&self, skip: SkipRecord) {
        self.inner.lock().unwrap().skipped.push(skip);
    }

    /// Returns the accumulated recoverable errors.
    pub fn recovered(&self) -> Vec<String> {
        self.inner.lock().unwrap().recoverable.clone()
    }

    /// Returns the accumulated skip records.
    pub fn skipped(&self) -> Vec<SkipRecord> {
        self.inner.lock().unwrap().skipped.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_wins() {
        let bus = FaultBus::new();
        assert!(bus.failure().is_none());

        bus.fail("root enumeration failed");
        bus.fail("later failure");

        assert_eq!(bus.failure().unwrap(), "root enumeration failed");
    }

    #[test]
    fn test_recoverable_does_not_fail_run() {
        let bus = FaultBus::new();
        bus.add_recoverable("item fetch failed");
        bus.add_recoverable("another item fetch failed");

        assert!(bus.failure().is_none());
        assert_eq!(bus.recovered().len(), 2);
    }

    #[test]
    fn test_skips_are_categorized() {
        let bus = FaultBus::new();
        bus.add_skip(SkipRecord::new(
            SkipReason::Malware,
            Some(ItemId::new("item-1").unwrap()),
            "flagged by provider",
        ));
        bus.add_skip(SkipRecord::new(SkipReason::NotFound, None, "deleted in flight"));

        let skipped = bus.skipped();
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].reason, SkipReason::Malware);
        assert_eq!(skipped[1].reason, SkipReason::NotFound);
        assert!(bus.failure().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let bus = FaultBus::new();
        let clone = bus.clone();
        clone.add_recoverable("seen by both");
        assert_eq!(bus.recovered().len(), 1);
        assert_eq!(bus.run_id(), clone.run_id());
    }

    #[test]
    fn test_for_run_keeps_identifier() {
        let run_id = RunId::new();
        let bus = FaultBus::for_run(run_id);
        assert_eq!(bus.run_id(), run_id);
    }
}
