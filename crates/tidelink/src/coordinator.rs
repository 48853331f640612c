//! Client-side optimistic sync coordinator.
//!
//! Tracks mutations applied speculatively before server confirmation and
//! reconciles them against the server's sequenced delta stream. Transport
//! independent: the connection layer (or anything else) feeds it
//! [`ServerDelta`]s and confirm/reject signals; it answers with events the
//! application's state layer consumes.
//!
//! Event flow:
//!
//! ```text
//!   app mutation ──▶ register_pending_mutation ──▶ StateChange
//!   server ack   ──▶ confirm_mutation          ──▶ StateChange
//!   server nack  ──▶ reject_mutation           ──▶ Rollback | StateChange
//!   server delta ──▶ process_server_delta      ──▶ ApplyDelta + StateChange
//!                                               │
//!                                 gap detected ─┴▶ RequestMissing
//! ```
//!
//! All events are dispatched deferred (see [`Emitter`]); no listener ever
//! runs inside a coordinator method.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::deadline::Deadline;
use crate::emitter::{Emitter, ListenerId};
use crate::protocol::{ClientSeq, ErrorShape, PatchMap, ServerDelta, ServerSeq};

/// Default time a registered mutation may stay unconfirmed.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Configuration for a [`SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a pending mutation may wait for confirmation before it is
    /// treated as rejected.
    pub mutation_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
        }
    }
}

/// Events emitted by the coordinator to the application's state layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A confirmed delta should be applied to the confirmed state.
    ApplyDelta {
        /// Opaque delta payload, forwarded untouched.
        data: serde_json::Value,
    },
    /// A rejected mutation's speculative effects should be undone using its
    /// inverse patches.
    ///
    /// Best-effort: only the rejected mutation's own inverse patches are
    /// emitted. Mutations optimistically layered on top of the rejected one
    /// are not re-derived, so consumers must tolerate transient
    /// inconsistency until the next confirmed delta or refetch.
    Rollback {
        /// The rejected mutation's inverse patches.
        patches: PatchMap,
        /// Why the mutation was rejected, if known.
        error: Option<ErrorShape>,
    },
    /// A gap was detected in the delta stream; the caller should ask the
    /// server to re-deliver the range (both ends inclusive).
    RequestMissing {
        /// First missing seq.
        from_seq: ServerSeq,
        /// Last missing seq.
        to_seq: ServerSeq,
    },
    /// Pending-mutation bookkeeping or the confirmed base changed;
    /// dependents should recompute their optimistic projection.
    StateChange,
}

/// Input to [`SyncCoordinator::register_pending_mutation`].
#[derive(Debug, Clone)]
pub struct MutationRegistration {
    /// The seq obtained from [`SyncCoordinator::generate_client_seq`].
    pub client_seq: ClientSeq,
    /// The mutation call payload, kept for diagnostics.
    pub payload: serde_json::Value,
    /// The speculative patches applied locally for this mutation.
    pub optimistic_patches: PatchMap,
    /// Patches that undo `optimistic_patches`. Without them, rejection can
    /// only signal a recompute (no local undo is possible).
    pub inverse_patches: Option<PatchMap>,
}

struct PendingMutation {
    payload: serde_json::Value,
    optimistic_patches: PatchMap,
    inverse_patches: Option<PatchMap>,
    created_at: Instant,
    // Owned timer; dropped (and thereby cancelled) with the entry.
    _deadline: Deadline,
}

struct CoordinatorState {
    // BTreeMap: pending mutations must iterate in ascending client_seq
    // order wherever patches are combined.
    pending: BTreeMap<ClientSeq, PendingMutation>,
    confirmed_server_seq: ServerSeq,
    initial_seq_set: bool,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    next_client_seq: AtomicU64,
    state: Mutex<CoordinatorState>,
    events: Emitter<SyncEvent>,
}

/// Optimistic sync coordinator handle. Cheap to clone; clones share state.
///
/// Must be used from within a tokio runtime: mutation timeouts and event
/// dispatch are scheduled on the ambient runtime's task queue.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
    /// Create a coordinator with the given configuration.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                next_client_seq: AtomicU64::new(0),
                state: Mutex::new(CoordinatorState {
                    pending: BTreeMap::new(),
                    confirmed_server_seq: -1,
                    initial_seq_set: false,
                }),
                events: Emitter::new(),
            }),
        }
    }

    /// Register `callback` for coordinator events; returns a handle for
    /// [`SyncCoordinator::off`].
    pub fn on_event(&self, callback: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.on(callback)
    }

    /// Remove an event listener.
    pub fn off(&self, id: ListenerId) {
        self.inner.events.off(id);
    }

    /// Allocate the next client seq: strictly increasing, first value 1.
    pub fn generate_client_seq(&self) -> ClientSeq {
        self.inner.next_client_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a mutation applied speculatively, starting its confirmation
    /// timeout. Registering an already-known `client_seq` logs and does
    /// nothing.
    pub fn register_pending_mutation(&self, registration: MutationRegistration) {
        let MutationRegistration {
            client_seq,
            payload,
            optimistic_patches,
            inverse_patches,
        } = registration;

        let weak = Arc::downgrade(&self.inner);
        let deadline = Deadline::after(self.inner.config.mutation_timeout, move || {
            CoordinatorInner::timeout_mutation(&weak, client_seq);
        });

        {
            let mut state = self.inner.state.lock().unwrap();
            if state.pending.contains_key(&client_seq) {
                log::warn!(
                    "[Coordinator] client_seq {client_seq} already registered; ignoring duplicate"
                );
                return;
            }
            state.pending.insert(
                client_seq,
                PendingMutation {
                    payload,
                    optimistic_patches,
                    inverse_patches,
                    created_at: Instant::now(),
                    _deadline: deadline,
                },
            );
        }

        self.inner.events.emit(SyncEvent::StateChange);
    }

    /// Resolve a pending mutation as confirmed by the server.
    ///
    /// An unknown `client_seq` is expected (already confirmed, rejected, or
    /// timed out) and is a silent no-op.
    pub fn confirm_mutation(&self, client_seq: ClientSeq, server_seq: Option<ServerSeq>) {
        let removed = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.remove(&client_seq)
        };
        let Some(mutation) = removed else {
            log::debug!("[Coordinator] confirm for unknown client_seq {client_seq}; ignoring");
            return;
        };
        log::debug!(
            "[Coordinator] confirmed client_seq {client_seq} (server_seq {server_seq:?}) after {:?}",
            mutation.created_at.elapsed()
        );
        self.inner.events.emit(SyncEvent::StateChange);
    }

    /// Resolve a pending mutation as rejected by the server.
    ///
    /// With inverse patches present, emits [`SyncEvent::Rollback`];
    /// otherwise emits [`SyncEvent::StateChange`] only and the consumer must
    /// recompute from confirmed state (e.g. refetch). An unknown
    /// `client_seq` is a silent no-op.
    pub fn reject_mutation(&self, client_seq: ClientSeq, error: Option<ErrorShape>) {
        self.inner.reject(client_seq, error, "rejected");
    }

    /// Feed one sequenced server delta.
    ///
    /// Stale deltas (`server_seq` at or below the confirmed watermark) are
    /// dropped. A delta whose `prev_server_seq` does not match the watermark
    /// signals a gap: [`SyncEvent::RequestMissing`] is emitted and the delta
    /// itself is discarded — the server must re-deliver it after the gap is
    /// filled, nothing is buffered here.
    pub fn process_server_delta(&self, delta: ServerDelta) {
        let event = {
            let mut state = self.inner.state.lock().unwrap();
            if delta.server_seq <= state.confirmed_server_seq {
                log::debug!(
                    "[Coordinator] stale delta seq {} (confirmed {}); dropping",
                    delta.server_seq,
                    state.confirmed_server_seq
                );
                return;
            }
            if let Some(prev) = delta.prev_server_seq
                && prev != state.confirmed_server_seq
            {
                let from_seq = state.confirmed_server_seq + 1;
                let to_seq = delta.server_seq - 1;
                log::warn!(
                    "[Coordinator] gap detected: confirmed {}, delta declares prev {prev}; requesting {from_seq}..={to_seq}",
                    state.confirmed_server_seq
                );
                SyncEvent::RequestMissing { from_seq, to_seq }
            } else {
                state.confirmed_server_seq = delta.server_seq;
                SyncEvent::ApplyDelta { data: delta.data }
            }
        };

        let applied = matches!(event, SyncEvent::ApplyDelta { .. });
        self.inner.events.emit(event);
        if applied {
            // Dependents recompute their optimistic projection on top of the
            // new confirmed base.
            self.inner.events.emit(SyncEvent::StateChange);
        }
    }

    /// Merge every pending mutation's optimistic patches, in ascending
    /// `client_seq` order, concatenating per-key patch lists. Callers apply
    /// the result on top of confirmed state to derive the optimistic view.
    pub fn get_pending_patches(&self) -> PatchMap {
        let state = self.inner.state.lock().unwrap();
        let mut merged = PatchMap::new();
        for mutation in state.pending.values() {
            for (key, patches) in &mutation.optimistic_patches {
                merged
                    .entry(key.clone())
                    .or_default()
                    .extend(patches.iter().cloned());
            }
        }
        merged
    }

    /// Seed the confirmed watermark (e.g. from an initial snapshot).
    /// Allowed only once, and only while no mutations are pending;
    /// otherwise logs and ignores.
    pub fn set_initial_server_seq(&self, seq: ServerSeq) {
        let mut state = self.inner.state.lock().unwrap();
        if state.initial_seq_set {
            log::warn!("[Coordinator] initial server seq already set; ignoring");
            return;
        }
        if !state.pending.is_empty() {
            log::warn!(
                "[Coordinator] cannot set initial server seq with {} pending mutation(s); ignoring",
                state.pending.len()
            );
            return;
        }
        state.confirmed_server_seq = seq;
        state.initial_seq_set = true;
    }

    /// Number of mutations awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Highest server seq fully applied, −1 if none yet.
    pub fn confirmed_server_seq(&self) -> ServerSeq {
        self.inner.state.lock().unwrap().confirmed_server_seq
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("SyncCoordinator")
            .field("pending", &state.pending.len())
            .field("confirmed_server_seq", &state.confirmed_server_seq)
            .finish()
    }
}

impl CoordinatorInner {
    fn timeout_mutation(weak: &Weak<CoordinatorInner>, client_seq: ClientSeq) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let error = ErrorShape::with_code(
            format!("mutation {client_seq} timed out awaiting confirmation"),
            "TIMEOUT",
        );
        inner.reject(client_seq, Some(error), "timed out");
    }

    fn reject(&self, client_seq: ClientSeq, error: Option<ErrorShape>, verb: &str) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.pending.remove(&client_seq)
        };
        let Some(mutation) = removed else {
            log::debug!("[Coordinator] reject for unknown client_seq {client_seq}; ignoring");
            return;
        };
        log::debug!(
            "[Coordinator] client_seq {client_seq} {verb} after {:?} (payload: {})",
            mutation.created_at.elapsed(),
            mutation.payload
        );
        match mutation.inverse_patches {
            Some(patches) => self.events.emit(SyncEvent::Rollback { patches, error }),
            None => self.events.emit(SyncEvent::StateChange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator() -> SyncCoordinator {
        SyncCoordinator::new(CoordinatorConfig::default())
    }

    fn patches(key: &str, ops: &[serde_json::Value]) -> PatchMap {
        let mut map = PatchMap::new();
        map.insert(key.to_string(), ops.to_vec());
        map
    }

    fn registration(client_seq: ClientSeq) -> MutationRegistration {
        MutationRegistration {
            client_seq,
            payload: json!({"op": "create"}),
            optimistic_patches: patches("todos", &[json!({"add": client_seq})]),
            inverse_patches: None,
        }
    }

    fn collect_events(c: &SyncCoordinator) -> Arc<Mutex<Vec<SyncEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        c.on_event(move |e| sink.lock().unwrap().push(e.clone()));
        events
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_client_seq_starts_at_one_and_increases() {
        let c = coordinator();
        assert_eq!(c.generate_client_seq(), 1);
        assert_eq!(c.generate_client_seq(), 2);
        assert_eq!(c.generate_client_seq(), 3);
    }

    #[tokio::test]
    async fn test_pending_count_accounting() {
        let c = coordinator();
        c.register_pending_mutation(registration(1));
        c.register_pending_mutation(registration(2));
        c.register_pending_mutation(registration(3));
        assert_eq!(c.pending_count(), 3);

        c.confirm_mutation(1, Some(10));
        c.reject_mutation(2, None);
        assert_eq!(c.pending_count(), 1);

        // Resolving already-resolved seqs never goes negative.
        c.confirm_mutation(1, None);
        c.reject_mutation(2, None);
        c.confirm_mutation(3, None);
        assert_eq!(c.pending_count(), 0);
        c.confirm_mutation(3, None);
        assert_eq!(c.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_ignored() {
        let c = coordinator();
        c.register_pending_mutation(registration(1));
        let mut dup = registration(1);
        dup.optimistic_patches = patches("todos", &[json!({"add": "dup"})]);
        c.register_pending_mutation(dup);

        assert_eq!(c.pending_count(), 1);
        let merged = c.get_pending_patches();
        assert_eq!(merged["todos"], vec![json!({"add": 1})]);
    }

    #[tokio::test]
    async fn test_delta_advances_confirmed_seq_and_applies() {
        let c = coordinator();
        let events = collect_events(&c);

        c.process_server_delta(ServerDelta {
            data: json!({"v": 1}),
            server_seq: 0,
            prev_server_seq: None,
        });
        settle().await;

        assert_eq!(c.confirmed_server_seq(), 0);
        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                SyncEvent::ApplyDelta { data: json!({"v": 1}) },
                SyncEvent::StateChange,
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_delta_is_idempotent() {
        let c = coordinator();
        c.process_server_delta(ServerDelta {
            data: json!(1),
            server_seq: 5,
            prev_server_seq: None,
        });
        let events = collect_events(&c);

        // Same seq and an older seq: no watermark change, no ApplyDelta.
        c.process_server_delta(ServerDelta {
            data: json!(1),
            server_seq: 5,
            prev_server_seq: Some(4),
        });
        c.process_server_delta(ServerDelta {
            data: json!(0),
            server_seq: 3,
            prev_server_seq: Some(2),
        });
        settle().await;

        assert_eq!(c.confirmed_server_seq(), 5);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gap_emits_request_missing_and_discards_delta() {
        let c = coordinator();
        c.set_initial_server_seq(5);
        let events = collect_events(&c);

        c.process_server_delta(ServerDelta {
            data: json!({"v": 8}),
            server_seq: 8,
            prev_server_seq: Some(7),
        });
        settle().await;

        // Exactly one RequestMissing for 6..=7, no apply, watermark unmoved.
        assert_eq!(c.confirmed_server_seq(), 5);
        assert_eq!(
            *events.lock().unwrap(),
            vec![SyncEvent::RequestMissing {
                from_seq: 6,
                to_seq: 7,
            }]
        );

        // The gapped delta was not buffered: once the gap is filled the
        // server must re-deliver seq 8 itself.
        events.lock().unwrap().clear();
        c.process_server_delta(ServerDelta {
            data: json!({"v": 6}),
            server_seq: 6,
            prev_server_seq: Some(5),
        });
        c.process_server_delta(ServerDelta {
            data: json!({"v": 7}),
            server_seq: 7,
            prev_server_seq: Some(6),
        });
        settle().await;
        assert_eq!(c.confirmed_server_seq(), 7);
        let seen: Vec<_> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SyncEvent::ApplyDelta { .. }))
            .cloned()
            .collect();
        assert_eq!(
            seen,
            vec![
                SyncEvent::ApplyDelta { data: json!({"v": 6}) },
                SyncEvent::ApplyDelta { data: json!({"v": 7}) },
            ]
        );
    }

    #[tokio::test]
    async fn test_matching_prev_seq_applies() {
        let c = coordinator();
        c.set_initial_server_seq(5);
        c.process_server_delta(ServerDelta {
            data: json!({}),
            server_seq: 6,
            prev_server_seq: Some(5),
        });
        assert_eq!(c.confirmed_server_seq(), 6);
    }

    #[tokio::test]
    async fn test_pending_patches_merge_in_client_seq_order() {
        let c = coordinator();
        // Register out of order; merge must still be ascending by seq.
        let mut b = registration(2);
        b.optimistic_patches = patches("todos", &[json!({"add": "y"})]);
        c.register_pending_mutation(b);
        let mut a = registration(1);
        a.optimistic_patches = patches("todos", &[json!({"add": "x"})]);
        c.register_pending_mutation(a);

        let merged = c.get_pending_patches();
        assert_eq!(
            merged["todos"],
            vec![json!({"add": "x"}), json!({"add": "y"})]
        );
    }

    #[tokio::test]
    async fn test_rejection_with_inverse_patches_emits_rollback() {
        let c = coordinator();
        let events = collect_events(&c);

        let inverse = patches("todos", &[json!({"remove": "item#temp1"})]);
        c.register_pending_mutation(MutationRegistration {
            client_seq: 1,
            payload: json!({"op": "create"}),
            optimistic_patches: patches("todos", &[json!({"add": "item#temp1"})]),
            inverse_patches: Some(inverse.clone()),
        });
        c.reject_mutation(1, Some(ErrorShape::new("constraint violation")));
        settle().await;

        assert_eq!(c.pending_count(), 0);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SyncEvent::StateChange);
        match &events[1] {
            SyncEvent::Rollback { patches, error } => {
                assert_eq!(*patches, inverse);
                assert_eq!(error.as_ref().unwrap().message, "constraint violation");
            }
            other => panic!("Expected Rollback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_without_inverse_emits_state_change_only() {
        let c = coordinator();
        c.register_pending_mutation(registration(1));
        let events = collect_events(&c);

        c.reject_mutation(1, None);
        settle().await;

        assert_eq!(*events.lock().unwrap(), vec![SyncEvent::StateChange]);
    }

    #[tokio::test]
    async fn test_mutation_timeout_behaves_like_rejection() {
        let c = SyncCoordinator::new(CoordinatorConfig {
            mutation_timeout: Duration::from_millis(30),
        });
        let events = collect_events(&c);

        let inverse = patches("todos", &[json!({"remove": "tmp"})]);
        c.register_pending_mutation(MutationRegistration {
            client_seq: 1,
            payload: json!({}),
            optimistic_patches: PatchMap::new(),
            inverse_patches: Some(inverse.clone()),
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(c.pending_count(), 0);
        let events = events.lock().unwrap();
        let rollback = events
            .iter()
            .find(|e| matches!(e, SyncEvent::Rollback { .. }))
            .expect("timeout should emit Rollback");
        match rollback {
            SyncEvent::Rollback { patches, error } => {
                assert_eq!(*patches, inverse);
                assert_eq!(error.as_ref().unwrap().code.as_deref(), Some("TIMEOUT"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_confirm_cancels_timeout() {
        let c = SyncCoordinator::new(CoordinatorConfig {
            mutation_timeout: Duration::from_millis(30),
        });
        c.register_pending_mutation(registration(1));
        c.confirm_mutation(1, Some(7));
        let events = collect_events(&c);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // No late Rollback/StateChange from a fired timer.
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_initial_server_seq_rules() {
        let c = coordinator();
        c.set_initial_server_seq(41);
        assert_eq!(c.confirmed_server_seq(), 41);

        // Second call ignored.
        c.set_initial_server_seq(99);
        assert_eq!(c.confirmed_server_seq(), 41);

        // With pending mutations, ignored even on first call.
        let c2 = coordinator();
        c2.register_pending_mutation(registration(1));
        c2.set_initial_server_seq(10);
        assert_eq!(c2.confirmed_server_seq(), -1);
    }

    #[tokio::test]
    async fn test_off_unsubscribes_listener() {
        let c = coordinator();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let id = c.on_event(move |e| sink.lock().unwrap().push(e.clone()));
        c.off(id);

        c.register_pending_mutation(registration(1));
        settle().await;
        assert!(events.lock().unwrap().is_empty());
    }
}
