//! Batch planning: ordered, fixed-size slices of the input list.

use std::ops::Range;

/// Ordered sequence of contiguous index ranges over the input list.
///
/// Derived deterministically from the input length and the configured batch
/// size; every range has `batch_size` elements except possibly the last.
/// Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    total: usize,
    batch_size: usize,
}

impl BatchPlan {
    /// `batch_size` must be at least 1; enforced upstream by configuration
    /// validation.
    pub fn new(total: usize, batch_size: usize) -> Self {
        debug_assert!(batch_size >= 1, "batch_size must be at least 1");
        Self { total, batch_size }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches: ⌈total / batch_size⌉.
    pub fn batch_count(&self) -> usize {
        self.total.div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Iterate the index ranges in input order.
    pub fn iter(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        let total = self.total;
        let batch_size = self.batch_size;
        (0..self.batch_count()).map(move |index| {
            let start = index * batch_size;
            start..(start + batch_size).min(total)
        })
    }
}
