//! Sender and receiver loops.
//!
//! Each connected transport runs one of each. The sender drains the local
//! send queue into the mailbox; the receiver waits on the peer's signal and
//! drains the mailbox into the local receive queue. Callbacks run on these
//! threads with no lock held.

use crate::qp::transport::{Direction, Link, Transport};

/// Sender loop: publish, signal the peer, complete, recycle.
pub(crate) fn run_sender(transport: &Transport, link: &Link) {
    tracing::debug!(role = %transport.role(), "sender started");
    while let Some((index, context)) = transport.next_send() {
        let ticket = context.ticket;
        let size = context.data.size();
        let sent = link
            .mailbox
            .publish(context.data.as_slice())
            .and_then(|()| link.signals.raise());
        match sent {
            Ok(()) => {
                tracing::trace!(ticket, size, "send completed");
                context.complete(transport);
                transport.recycle(Direction::Send, index);
            }
            Err(err) => {
                tracing::error!(ticket, size, error = %err, "send failed");
                context.fail(transport, err);
                transport.recycle(Direction::Send, index);
                break;
            }
        }
    }
    transport.on_link_failure(Direction::Send);
    tracing::debug!(role = %transport.role(), "sender stopped");
}

/// Receiver loop: wait for the peer, consume into the head receive,
/// complete, recycle.
pub(crate) fn run_receiver(transport: &Transport, link: &Link) {
    tracing::debug!(role = %transport.role(), "receiver started");
    loop {
        if let Err(err) = link.signals.await_signal() {
            tracing::debug!(error = %err, "inbound signal closed");
            break;
        }
        let Some((index, mut context)) = transport.next_receive() else {
            match link.mailbox.discard() {
                Ok(size) => tracing::warn!(size, "no receive posted, message dropped"),
                Err(err) if err.is_disconnect() => break,
                Err(err) => tracing::warn!(error = %err, "failed to drop unexpected message"),
            }
            continue;
        };
        let ticket = context.ticket;
        match link.mailbox.consume(&mut context.data) {
            Ok(size) => {
                tracing::trace!(ticket, size, "receive completed");
                context.complete(transport);
                transport.recycle(Direction::Receive, index);
            }
            Err(err) if err.is_disconnect() => {
                context.fail(transport, err);
                transport.recycle(Direction::Receive, index);
                break;
            }
            Err(err) => {
                tracing::warn!(ticket, error = %err, "receive failed");
                context.fail(transport, err);
                transport.recycle(Direction::Receive, index);
            }
        }
    }
    transport.on_link_failure(Direction::Receive);
    tracing::debug!(role = %transport.role(), "receiver stopped");
}
