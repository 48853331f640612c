//! # `tidelink`
//!
//! An RPC/subscription protocol client for a single persistent WebSocket
//! connection: queries and mutations correlated to their results,
//! server-pushed subscription streams, automatic reconnection with
//! resubscription, and an optimistic-mutation coordinator that reconciles
//! speculative local changes against the server's sequenced delta stream.
//!
//! The two halves compose but do not depend on each other:
//!
//! - [`LinkClient`] owns the socket: [`LinkClient::call`] for one-shot
//!   requests, [`LinkClient::subscribe`] for sequenced result streams.
//! - [`SyncCoordinator`] owns optimistic-mutation bookkeeping: feed it the
//!   deltas a subscription yields, the acks the server sends, and it tells
//!   the state layer what to apply, roll back, or re-request.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tidelink::{
//!     CoordinatorConfig, LinkClient, LinkConfig, MutationRegistration, SyncCoordinator,
//!     SyncEvent,
//! };
//!
//! # async fn demo() -> Result<(), tidelink::LinkError> {
//! let coordinator = SyncCoordinator::new(CoordinatorConfig::default());
//! let ack = coordinator.clone();
//! let config = LinkConfig::new("wss://api.example.com/link")
//!     .with_ack_callback(Arc::new(move |client_seq, server_seq| {
//!         ack.confirm_mutation(client_seq, Some(server_seq));
//!     }));
//! let client = LinkClient::new(config);
//!
//! // Subscription deltas feed the coordinator.
//! let mut updates = client.subscribe("todo.watch", json!({}));
//! coordinator.on_event(|event| {
//!     if let SyncEvent::RequestMissing { from_seq, to_seq } = event {
//!         // forward to client.request_missing(*from_seq, *to_seq)
//!     }
//! });
//!
//! // Optimistic mutation: record locally, then send.
//! let client_seq = coordinator.generate_client_seq();
//! coordinator.register_pending_mutation(MutationRegistration {
//!     client_seq,
//!     payload: json!({"title": "write docs"}),
//!     optimistic_patches: Default::default(),
//!     inverse_patches: None,
//! });
//! client.call("todo.create", json!({"title": "write docs", "client_seq": client_seq})).await?;
//!
//! while let Some(delta) = updates.next().await {
//!     coordinator.process_server_delta(delta?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod codec;
mod config;
mod connection;
mod coordinator;
mod deadline;
mod emitter;
mod error;
mod protocol;
/// Server-side collaborator contract: sequence stamping and subscription
/// cleanup.
pub mod server;
mod subscription;
#[cfg(feature = "native-transport")]
mod tokio_transport;
mod transport;

pub use codec::{Codec, JsonCodec};
pub use config::{
    AckCallback, ConnectionStatus, DEFAULT_BASE_RECONNECT_DELAY, DEFAULT_JITTER_BAND,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY, DEFAULT_REQUEST_TIMEOUT,
    LinkConfig, StatusCallback,
};
pub use connection::LinkClient;
pub use coordinator::{
    CoordinatorConfig, DEFAULT_MUTATION_TIMEOUT, MutationRegistration, SyncCoordinator, SyncEvent,
};
pub use emitter::{Emitter, ListenerId};
pub use error::{LinkError, TransportError};
pub use protocol::{
    ClientMessage, ClientSeq, ErrorShape, MessageId, Patch, PatchList, PatchMap, ServerDelta,
    ServerMessage, ServerSeq, StateKey,
};
pub use subscription::Subscription;
#[cfg(feature = "native-transport")]
pub use tokio_transport::{TokioConnector, TokioTransport};
pub use transport::{Connector, Transport, WsMessage};
