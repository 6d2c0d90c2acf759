use std::fmt;

use crate::{Pos, SeqId, TokenId};

/// One token submitted to a decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    pub pos: Pos,
    pub seq_id: SeqId,
    /// Produce logits for this position.
    pub logits: bool,
}

/// Returned by [`Batch::try_add`] when the batch is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchFull {
    pub capacity: usize,
}

impl fmt::Display for BatchFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch is full ({} tokens)", self.capacity)
    }
}

impl std::error::Error for BatchFull {}

/// Reusable, fixed-capacity buffer of tokens for one decode step.
///
/// The capacity is allocated once; `clear` only resets the length.
#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl Batch {
    pub fn new(capacity: usize) -> Self {
        Batch {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends an entry.
    ///
    /// # Panics
    /// Panics when the batch is full. Batches are sized from the context's
    /// batch width, so overflowing one is a bug in the caller.
    pub fn add(&mut self, token: TokenId, pos: Pos, seq_id: SeqId, logits: bool) {
        if let Err(full) = self.try_add(token, pos, seq_id, logits) {
            panic!("{full}");
        }
    }

    pub fn try_add(&mut self, token: TokenId, pos: Pos, seq_id: SeqId, logits: bool) -> Result<(), BatchFull> {
        if self.entries.len() >= self.capacity {
            return Err(BatchFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(BatchEntry {
            token,
            pos,
            seq_id,
            logits,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn n_logits(&self) -> usize {
        self.entries.iter().filter(|e| e.logits).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_keeps_allocation() {
        let mut batch = Batch::new(4);
        batch.add(1, 0, 0, false);
        batch.add(2, 1, 0, true);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.n_logits(), 1);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 4);
        assert!(batch.entries.capacity() >= 4);
    }

    #[test]
    fn test_try_add_reports_full() {
        let mut batch = Batch::new(1);
        batch.try_add(7, 0, 0, true).unwrap();
        assert!(batch.is_full());
        assert_eq!(batch.try_add(8, 1, 0, true), Err(BatchFull { capacity: 1 }));
        assert_eq!(batch.entries()[0].token, 7);
    }

    #[test]
    #[should_panic(expected = "batch is full")]
    fn test_add_past_capacity_panics() {
        let mut batch = Batch::new(1);
        batch.add(1, 0, 0, false);
        batch.add(2, 1, 0, false);
    }
}
