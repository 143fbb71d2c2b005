use std::collections::BTreeMap;

use crate::message::PartitionKey;

/// Last recorded offset per partition. A missing key means we have not seen
/// that partition yet.
pub type OffsetLedger = BTreeMap<PartitionKey, i64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityResult {
    Continuous,
    Gap { expected: i64, found: i64 },
}

impl ContinuityResult {
    pub fn is_gap(&self) -> bool {
        matches!(self, ContinuityResult::Gap { .. })
    }
}

/// Checks that offsets for each partition arrive one after another.
///
/// The broker is expected to hand us every partition in order, but nothing
/// enforces that on our side. A gap is only a diagnostic: the ledger always
/// moves to the offset we just saw, and nothing is buffered or reordered.
#[derive(Debug, Default)]
pub struct ContinuityTracker {
    ledger: OffsetLedger,
}

impl ContinuityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `offset` as the latest for `key` and report whether it directly
    /// follows the previously recorded one.
    pub fn observe(&mut self, key: &PartitionKey, offset: i64) -> ContinuityResult {
        if let Some(last) = self.ledger.get_mut(key) {
            let previous = *last;
            *last = offset;

            return if previous.checked_add(1) == Some(offset) {
                ContinuityResult::Continuous
            } else {
                ContinuityResult::Gap {
                    expected: previous.saturating_add(1),
                    found: offset,
                }
            };
        }

        self.ledger.insert(key.clone(), offset);
        ContinuityResult::Continuous
    }

    pub fn last_offset(&self, key: &PartitionKey) -> Option<i64> {
        self.ledger.get(key).copied()
    }

    pub fn ledger(&self) -> &OffsetLedger {
        &self.ledger
    }

    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }
}
