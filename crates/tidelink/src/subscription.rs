//! Consumer-facing subscription streams.
//!
//! A [`Subscription`] is a pull-based, finite, non-restartable sequence of
//! sequenced deltas ending in exactly one of {terminal error, graceful end}.
//! Once ended, a fresh `subscribe` call is required.
//!
//! Internally this is an unbounded channel: the sender side lives in the
//! connection task (which buffers by sending) and the receiver side here
//! holds at most one waiting consumer — exactly the buffer-plus-waiter
//! shape the multiplexer needs.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::connection::Cmd;
use crate::error::LinkError;
use crate::protocol::{MessageId, ServerDelta};

/// Events routed from the connection task into one subscription stream.
#[derive(Debug)]
pub(crate) enum SubscriptionEvent {
    /// A sequenced data event.
    Data(ServerDelta),
    /// Terminal failure; the stream is over.
    Error(LinkError),
    /// Graceful completion; the stream is over.
    End,
}

/// A handle to one active subscription.
///
/// Dropping the handle cancels the subscription (same path as
/// [`Subscription::unsubscribe`]).
#[derive(Debug)]
pub struct Subscription {
    id: MessageId,
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    done: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: MessageId,
        rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
        cmd_tx: mpsc::UnboundedSender<Cmd>,
    ) -> Self {
        Self {
            id,
            rx,
            cmd_tx,
            done: false,
        }
    }

    /// The subscription's correlation id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `Some(Ok(delta))` for data, `Some(Err(e))` exactly once for a
    /// terminal error, and `None` forever after the stream has ended (error,
    /// graceful end, or unsubscribe).
    pub async fn next(&mut self) -> Option<Result<ServerDelta, LinkError>> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(SubscriptionEvent::Data(delta)) => Some(Ok(delta)),
            Some(SubscriptionEvent::Error(e)) => {
                self.done = true;
                Some(Err(e))
            }
            Some(SubscriptionEvent::End) | None => {
                self.done = true;
                None
            }
        }
    }

    /// Cancel the subscription. Idempotent: ends the local stream, asks the
    /// connection task to drop the entry, and sends a stop message to the
    /// server only if the entry was still live and the connection is open.
    pub fn unsubscribe(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let _ = self.cmd_tx.send(Cmd::Unsubscribe { id: self.id });
        self.rx.close();
    }

    /// Whether the stream has ended (terminal event seen or unsubscribed).
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Consumer cancellation shares the unsubscribe path; the connection
        // task ignores this if the entry is already gone.
        if !self.done {
            let _ = self.cmd_tx.send(Cmd::Unsubscribe { id: self.id });
        }
    }
}

impl Stream for Subscription {
    type Item = Result<ServerDelta, LinkError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(SubscriptionEvent::Data(delta))) => Poll::Ready(Some(Ok(delta))),
            Poll::Ready(Some(SubscriptionEvent::Error(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(SubscriptionEvent::End)) | Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
