//! Subscription Reference Counting
//!
//! Tracks how many independent registrations want each [`SeriesKey`].
//! Only the first registration (0 → 1) and the last release (1 → 0) change
//! the wire-level subscription set; everything in between is local
//! bookkeeping.
//!
//! The instrument recorded by the first registration is the one sent
//! upstream for that key.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::series::{InstrumentRef, SeriesKey};

// =============================================================================
// Subscription Changes
// =============================================================================

/// Result of a subscribe or unsubscribe call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Keys whose refcount changed, in request order.
    pub accepted: Vec<SeriesKey>,
    /// Instruments that need a wire-level subscribe (refcount went 0 → 1).
    pub subscribe: Vec<InstrumentRef>,
    /// Instruments that need a wire-level unsubscribe (refcount went 1 → 0).
    pub unsubscribe: Vec<InstrumentRef>,
}

impl SubscriptionChanges {
    /// Check if any wire-level change is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

#[derive(Debug)]
struct Entry {
    instrument: InstrumentRef,
    ref_count: usize,
}

/// Thread-safe refcount table keyed by [`SeriesKey`].
///
/// # Example
///
/// ```rust
/// use quote_relay::domain::series::InstrumentRef;
/// use quote_relay::domain::subscription::SubscriptionManager;
///
/// let manager = SubscriptionManager::new();
/// let tcs = InstrumentRef::new("TCS", "NSE");
///
/// // First registration reaches the wire
/// let changes = manager.acquire(&[tcs.clone()]);
/// assert_eq!(changes.subscribe, vec![tcs.clone()]);
///
/// // Second one does not
/// assert!(manager.acquire(&[tcs.clone()]).is_empty());
///
/// // Releasing one of two keeps the wire subscription
/// assert!(manager.release(&[tcs.clone()]).is_empty());
///
/// // Releasing the last one removes it
/// assert_eq!(manager.release(&[tcs.clone()]).unsubscribe, vec![tcs]);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    entries: RwLock<HashMap<SeriesKey, Entry>>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in each instrument.
    ///
    /// Instruments with a blank symbol are ignored and not reported as
    /// accepted.
    pub fn acquire(&self, instruments: &[InstrumentRef]) -> SubscriptionChanges {
        let mut changes = SubscriptionChanges::default();
        let mut entries = self.entries.write();

        for instrument in instruments {
            if instrument.symbol.trim().is_empty() {
                continue;
            }
            let key = instrument.series_key();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                instrument: instrument.clone(),
                ref_count: 0,
            });
            entry.ref_count += 1;

            // First subscription - needs upstream subscribe
            if entry.ref_count == 1 {
                changes.subscribe.push(entry.instrument.clone());
            }
            changes.accepted.push(key);
        }

        changes
    }

    /// Release one registration for each instrument.
    ///
    /// Unknown keys are ignored.
    pub fn release(&self, instruments: &[InstrumentRef]) -> SubscriptionChanges {
        let mut changes = SubscriptionChanges::default();
        let mut entries = self.entries.write();

        for instrument in instruments {
            let key = instrument.series_key();
            let Some(entry) = entries.get_mut(&key) else {
                continue;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);

            // Last subscription removed - needs upstream unsubscribe
            if entry.ref_count == 0
                && let Some(removed) = entries.remove(&key)
            {
                changes.unsubscribe.push(removed.instrument);
            }
            changes.accepted.push(key);
        }

        changes
    }

    /// Drop every registration. Returns the instruments that were live.
    pub fn clear(&self) -> Vec<InstrumentRef> {
        self.entries
            .write()
            .drain()
            .map(|(_, entry)| entry.instrument)
            .collect()
    }

    /// Current refcount for `key` (0 if not subscribed).
    #[must_use]
    pub fn ref_count(&self, key: &SeriesKey) -> usize {
        self.entries.read().get(key).map_or(0, |entry| entry.ref_count)
    }

    /// Instruments with a live wire subscription.
    #[must_use]
    pub fn active(&self) -> Vec<InstrumentRef> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.instrument.clone())
            .collect()
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        SubscriptionStats {
            series_count: entries.len(),
            registration_count: entries.values().map(|entry| entry.ref_count).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of distinct series with a wire subscription.
    pub series_count: usize,
    /// Sum of all refcounts.
    pub registration_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
