// ⚖️ Reconciliation - Fold a fresh scrape into what is already stored
//
// Status history is append-only:
//   stored entries keep their position, new entries go after them in page order,
//   an entry seen before (same dedup key) is never written twice.
//
// Reads order by (date, ordinal), so the history is chronological and
// same-day entries keep their scrape order.

use crate::model::StatusUpdate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

// ============================================================================
// STORED STATUS
// ============================================================================

/// A status update as persisted: its page-order ordinal plus dedup key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStatus {
    pub ordinal: i64,
    pub dedup_key: String,
    pub update: StatusUpdate,
}

impl StoredStatus {
    pub fn new(ordinal: i64, update: StatusUpdate) -> Self {
        StoredStatus {
            ordinal,
            dedup_key: update.dedup_key(),
            update,
        }
    }

    /// Chronological order, ties broken by scrape order
    pub fn chronological(a: &StoredStatus, b: &StoredStatus) -> Ordering {
        a.update
            .date
            .cmp(&b.update.date)
            .then(a.ordinal.cmp(&b.ordinal))
    }
}

// ============================================================================
// MERGE RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMerge {
    /// Stored entries left untouched
    pub retained: usize,

    /// Entries to insert, ordinals already assigned
    pub appended: Vec<StoredStatus>,

    /// Incoming entries that were already known (stored or repeated on the page)
    pub skipped: usize,
}

impl StatusMerge {
    pub fn is_noop(&self) -> bool {
        self.appended.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} retained, {} appended, {} already known",
            self.retained,
            self.appended.len(),
            self.skipped
        )
    }
}

// ============================================================================
// MERGE
// ============================================================================

/// Merge a freshly parsed status list into the stored history.
///
/// Pure: the caller persists `appended` inside the same transaction it read
/// `existing` in.
pub fn merge_status_history(existing: &[StoredStatus], incoming: &[StatusUpdate]) -> StatusMerge {
    let known: HashSet<&str> = existing.iter().map(|s| s.dedup_key.as_str()).collect();
    let mut next_ordinal = existing.iter().map(|s| s.ordinal).max().map_or(0, |max| max + 1);

    let mut appended: Vec<StoredStatus> = Vec::new();
    let mut skipped = 0;
    let mut fresh_keys: HashSet<String> = HashSet::new();

    for update in incoming {
        let key = update.dedup_key();
        if known.contains(key.as_str()) || fresh_keys.contains(&key) {
            skipped += 1;
            continue;
        }
        fresh_keys.insert(key.clone());
        appended.push(StoredStatus {
            ordinal: next_ordinal,
            dedup_key: key,
            update: update.clone(),
        });
        next_ordinal += 1;
    }

    StatusMerge {
        retained: existing.len(),
        appended,
        skipped,
    }
}

/// Sort into read order
pub fn order_history(entries: &mut [StoredStatus]) {
    entries.sort_by(StoredStatus::chronological);
}

/// Most recent entry: latest date, then highest ordinal
pub fn latest_status(entries: &[StoredStatus]) -> Option<&StoredStatus> {
    entries.iter().max_by(|a, b| StoredStatus::chronological(a, b))
}

/// Check the guarantees a stored history must keep.
/// Returns a description of the first violation.
pub fn check_history(entries: &[StoredStatus]) -> Result<(), String> {
    let mut keys = HashSet::new();
    let mut ordinals = HashSet::new();

    for entry in entries {
        if !keys.insert(entry.dedup_key.as_str()) {
            return Err(format!("duplicate status dedup key {}", entry.dedup_key));
        }
        if !ordinals.insert(entry.ordinal) {
            return Err(format!("duplicate status ordinal {}", entry.ordinal));
        }
    }

    for pair in entries.windows(2) {
        if StoredStatus::chronological(&pair[0], &pair[1]) == Ordering::Greater {
            return Err(format!(
                "status history out of order: {} after {}",
                pair[1].update.date, pair[0].update.date
            ));
        }
    }
    Ok(())
}

/// A member's display name follows their most recent term: a scrape of an
/// older year never overwrites it.
pub fn should_update_member_name(latest_stored_year: Option<i32>, incoming_year: i32) -> bool {
    latest_stored_year.map_or(true, |latest| incoming_year >= latest)
}

// ============================================================================
// TESTS
// ============================================================================
