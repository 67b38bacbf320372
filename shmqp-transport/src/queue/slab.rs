//! Fixed-capacity context slab.
//!
//! Entries are sized once at setup and recycled through a free list, so
//! acquiring and releasing a slot is O(1) and never allocates.

/// State of one slab entry.
#[derive(Debug)]
enum Slot<T> {
    Free,
    Posted(T),
    /// Taken by a worker; the index stays reserved until released.
    InFlight,
}

/// Fixed set of reusable contexts.
#[derive(Debug)]
pub struct ContextSlab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> ContextSlab<T> {
    /// Creates a slab with `depth` free entries.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            slots: (0..depth).map(|_| Slot::Free).collect(),
            // Reversed so the lowest index is handed out first.
            free: (0..depth).rev().collect(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Number of free entries.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Returns true if no entry is free.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Stores `value` in a free entry and returns its index.
    ///
    /// # Errors
    /// Returns `value` back when every entry is in use.
    pub fn acquire(&mut self, value: T) -> Result<usize, T> {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Slot::Posted(value);
                Ok(index)
            }
            None => Err(value),
        }
    }

    /// Returns the value of a posted entry.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index)? {
            Slot::Posted(value) => Some(value),
            _ => None,
        }
    }

    /// Moves the value out of a posted entry, keeping the index reserved.
    pub fn take(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?;
        match std::mem::replace(slot, Slot::InFlight) {
            Slot::Posted(value) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Returns an entry to the free list.
    ///
    /// Returns false if the index was already free or out of range.
    pub fn release(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !matches!(slot, Slot::Free) => {
                *slot = Slot::Free;
                self.free.push(index);
                true
            }
            _ => false,
        }
    }
}
