//! # Realtime Database client layer
//!
//! Declarative locations, compiled queries and cancelable subscriptions on top of a
//! realtime hierarchical store.
//!
//! Every operation takes a [`Location`] expression that is resolved against the backend only
//! when the operation runs, so a malformed location fails before anything is sent. Reads,
//! writes and transactions are plain `async fn`s; listeners are registered with
//! [`Database::subscribe`] and live until [`Database::unsubscribe`] or until the backend
//! cancels them.
//!
//! ## Features
//!
//! - Location algebra (`url`, `child`, `parent`, `root`, `push`, raw references)
//! - Queries ordered by child, value, key or priority with range bounds and limits
//! - Subscriptions dispatched as independent tasks, with explicit cancellation notices
//! - Disconnect-scoped writes through [`Database::on_disconnect`]
//! - Transactions with abort / remove / set outcomes
//! - Two backends: an in-memory store and the REST API
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use firebase_rtdb_client::database::*;
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let database = Database::in_memory();
//!     let messages = Location::url("memory://default/").child("messages");
//!
//!     database.set(messages.clone().child("greeting"), json!("hello")).await?;
//!
//!     let id = database
//!         .subscribe(
//!             messages.clone(),
//!             QuerySpec::order_by_key(Range::Unbounded).limit_to_last(10),
//!             EventType::ChildAdded,
//!             |snapshot| async move {
//!                 println!("{} after '{}'", snapshot.key(), snapshot.prev_key());
//!             },
//!             |cancellation| async move {
//!                 println!("subscription ended: {cancellation:?}");
//!             },
//!         )
//!         .await?;
//!
//!     database.unsubscribe(&id).await?;
//!     Ok(())
//! }
//! ```

mod api;
pub mod backend;
pub mod error;
pub mod location;
mod on_disconnect;
mod options;
mod push_id;
pub mod query;
mod server_value;
pub mod snapshot;
pub mod subscription;
pub mod task;

pub use api::{Database, TransactionResult, ONCE_SNAPSHOT_ID, TRANSACTION_SNAPSHOT_ID};
pub use backend::{EventType, InMemoryBackend, RestBackend};
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseResult};
pub use location::{from_url, location, parent, push, root, sub, Location, Reference};
pub use on_disconnect::OnDisconnect;
pub use options::{connect, connect_with_scheduler, DatabaseOptions, Transport};
pub use query::{Limit, OrderBy, OrderedQuery, PriorityPoint, QuerySpec, Range};
pub use server_value::{increment, server_timestamp};
pub use snapshot::{Priority, Snapshot};
pub use subscription::{Cancellation, SubscriptionId};
pub use task::Action;
