//! Server-side collaborator contract.
//!
//! The client assumes two behaviors from the publishing side: every
//! subscription payload carries a strictly increasing per-subscription
//! `server_seq` chained to its predecessor, and each subscription's cleanup
//! runs exactly once, with failures contained. This module is the canonical
//! implementation of that contract — small enough to embed in a server and
//! used by this crate's integration tests to drive a faithful peer.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Mutex;

use futures_util::FutureExt;

use crate::protocol::{MessageId, ServerSeq};

/// Stamps subscription payloads with chained sequence numbers.
///
/// Per subscription: seqs start at 1, increase strictly, and each stamp
/// reports the previous stamped seq so the client can detect gaps.
#[derive(Debug, Default)]
pub struct SequenceStamper {
    last: Mutex<HashMap<MessageId, ServerSeq>>,
}

impl SequenceStamper {
    /// New stamper with no subscriptions tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next seq for `subscription`, returning
    /// `(server_seq, prev_server_seq)`.
    pub fn stamp(&self, subscription: MessageId) -> (ServerSeq, Option<ServerSeq>) {
        let mut last = self.last.lock().unwrap();
        let prev = last.get(&subscription).copied();
        let next = prev.map_or(1, |p| p + 1);
        last.insert(subscription, next);
        (next, prev)
    }

    /// Drop the counter for an ended subscription.
    pub fn forget(&self, subscription: MessageId) {
        self.last.lock().unwrap().remove(&subscription);
    }
}

type CleanupFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Runs each subscription's cleanup exactly once.
///
/// The cleanup contract is a single async step: a closure returning a
/// future of "done". Panics inside a cleanup (while building the future or
/// while awaiting it) are caught and logged, never propagated to the
/// caller.
#[derive(Default)]
pub struct CleanupRegistry {
    cleanups: Mutex<HashMap<MessageId, CleanupFn>>,
}

impl CleanupRegistry {
    /// New, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the cleanup for `subscription`, replacing any previous one.
    pub fn register<F, Fut>(&self, subscription: MessageId, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: CleanupFn = Box::new(move || Box::pin(cleanup()));
        if self
            .cleanups
            .lock()
            .unwrap()
            .insert(subscription, wrapped)
            .is_some()
        {
            log::warn!("[Cleanup] replaced existing cleanup for subscription {subscription}");
        }
    }

    /// Run the cleanup for `subscription`, if one is still registered.
    /// A second call for the same id is a no-op.
    pub async fn run(&self, subscription: MessageId) {
        let cleanup = {
            let mut cleanups = self.cleanups.lock().unwrap();
            cleanups.remove(&subscription)
        };
        let Some(cleanup) = cleanup else {
            log::debug!("[Cleanup] no cleanup registered for subscription {subscription}");
            return;
        };
        // Contain panics from both the closure and the future it returns.
        let outcome = AssertUnwindSafe(async move {
            cleanup().await;
        })
        .catch_unwind()
        .await;
        if outcome.is_err() {
            log::error!("[Cleanup] cleanup for subscription {subscription} panicked; swallowed");
        }
    }

    /// Run every remaining cleanup (e.g. on connection teardown).
    pub async fn run_all(&self) {
        let ids: Vec<MessageId> = self.cleanups.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.run(id).await;
        }
    }

    /// Number of cleanups still registered.
    pub fn len(&self) -> usize {
        self.cleanups.lock().unwrap().len()
    }

    /// Whether no cleanups remain.
    pub fn is_empty(&self) -> bool {
        self.cleanups.lock().unwrap().is_empty()
    }
}
