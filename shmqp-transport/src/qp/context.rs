//! Posted work request contexts.

use crate::error::TransportError;
use crate::qp::Transport;
use shmqp_core::Data;
use std::fmt;

/// Called with the transport and the data once a send or receive completes.
pub type CompletionCallback = Box<dyn FnOnce(&Transport, Data) + Send + 'static>;

/// Called with the transport, the data and the cause when a work request fails.
pub type ErrorCallback = Box<dyn FnOnce(&Transport, Data, TransportError) + Send + 'static>;

/// One posted send or receive.
pub(crate) struct Context {
    pub(crate) ticket: u64,
    pub(crate) data: Data,
    on_complete: CompletionCallback,
    on_error: ErrorCallback,
}

impl Context {
    pub(crate) fn new(
        ticket: u64,
        data: Data,
        on_complete: CompletionCallback,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            ticket,
            data,
            on_complete,
            on_error,
        }
    }

    /// Hands the data back through the completion callback.
    pub(crate) fn complete(self, transport: &Transport) {
        (self.on_complete)(transport, self.data);
    }

    /// Hands the data back through the error callback.
    pub(crate) fn fail(self, transport: &Transport, err: TransportError) {
        tracing::debug!(ticket = self.ticket, error = %err, "work request failed");
        (self.on_error)(transport, self.data, err);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("ticket", &self.ticket)
            .field("size", &self.data.size())
            .field("max_size", &self.data.max_size())
            .finish()
    }
}
