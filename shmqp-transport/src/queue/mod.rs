//! Bounded local work queues.
//!
//! A [`WorkQueue`] pairs a [`ContextSlab`] with a [`PendingQueue`]: posting
//! parks a context in a free slab entry and appends its index, the worker pops
//! indices in FIFO order, and the entry only becomes reusable once the worker
//! calls [`WorkQueue::complete`]. Callers serialize access with the
//! transport's lock.

pub mod pending;
pub mod slab;

pub use pending::PendingQueue;
pub use slab::ContextSlab;

/// One direction's slab plus its pending FIFO.
#[derive(Debug)]
pub struct WorkQueue<T> {
    slab: ContextSlab<T>,
    pending: PendingQueue,
}

impl<T> WorkQueue<T> {
    /// Creates a queue with `depth` contexts.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            slab: ContextSlab::new(depth),
            pending: PendingQueue::with_depth(depth),
        }
    }

    /// Number of contexts.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slab.depth()
    }

    /// Returns true if every context is posted or in flight.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slab.is_full()
    }

    /// Number of posted contexts not yet picked up by the worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if the worker has nothing to pick up.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Parks `value` in a free context and queues it at the tail.
    ///
    /// # Errors
    /// Returns `value` back when no context is free.
    pub fn post(&mut self, value: T) -> Result<(), T> {
        let index = self.slab.acquire(value)?;
        self.pending.push(index);
        Ok(())
    }

    /// Takes the head context. Its entry stays reserved until
    /// [`complete`](Self::complete) is called with the returned index.
    pub fn next(&mut self) -> Option<(usize, T)> {
        while let Some(index) = self.pending.pop() {
            if let Some(value) = self.slab.take(index) {
                return Some((index, value));
            }
        }
        None
    }

    /// Frees the context taken by [`next`](Self::next).
    pub fn complete(&mut self, index: usize) {
        if !self.slab.release(index) {
            tracing::warn!(index, "completed a context that was not in use");
        }
    }

    /// Withdraws the first queued context matching `pred`, freeing its entry.
    ///
    /// Contexts already taken by the worker cannot be withdrawn.
    pub fn cancel(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let index = self
            .pending
            .iter()
            .find(|&index| self.slab.get(index).is_some_and(&pred))?;
        self.pending.remove(index);
        let value = self.slab.take(index);
        self.slab.release(index);
        value
    }

    /// Removes every queued context, freeing their entries.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.pending.len());
        while let Some((index, value)) = self.next() {
            self.slab.release(index);
            drained.push(value);
        }
        drained
    }
}
