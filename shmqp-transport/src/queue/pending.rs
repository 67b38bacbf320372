//! FIFO of slab indices awaiting transfer.

use std::collections::VecDeque;

/// Posted contexts in submission order.
///
/// Holds slab indices rather than the contexts themselves; capacity is
/// reserved up front to the slab depth so pushes never reallocate.
#[derive(Debug)]
pub struct PendingQueue {
    indices: VecDeque<usize>,
}

impl PendingQueue {
    /// Creates a queue able to hold `depth` indices without reallocating.
    #[must_use]
    pub fn with_depth(depth: usize) -> Self {
        Self {
            indices: VecDeque::with_capacity(depth),
        }
    }

    /// Appends an index at the tail.
    pub fn push(&mut self, index: usize) {
        self.indices.push_back(index);
    }

    /// Removes and returns the head index.
    pub fn pop(&mut self) -> Option<usize> {
        self.indices.pop_front()
    }

    /// Returns the head index without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<usize> {
        self.indices.front().copied()
    }

    /// Removes the first occurrence of `index`, wherever it sits.
    ///
    /// Returns false if it was not queued.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.indices.iter().position(|&queued| queued == index) {
            Some(position) => {
                self.indices.remove(position);
                true
            }
            None => false,
        }
    }

    /// Iterates queued indices from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Number of queued indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
