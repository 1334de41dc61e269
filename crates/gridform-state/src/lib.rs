//! gridform-state — a local, persistent stand-in for a cloud and its cluster.
//!
//! Backed by [redb](https://docs.rs/redb). [`LocalCloud`] implements the
//! cloud handle, node observer and cluster validator over a [`StateStore`],
//! so the engine and rolling update can run end to end without a provider.
//!
//! # Architecture
//!
//! Resources are JSON-serialized into redb's `&[u8]` value columns under
//! `{kind}/{name}` keys, which keeps each kind contiguous for prefix scans.
//! Nodes are keyed by node name. `LocalCloud` is `Clone` + `Send` + `Sync`
//! (backed by `Arc<Database>`) and can be shared across async tasks.

pub mod cloud;
pub mod error;
pub mod store;
pub mod tables;

pub use cloud::LocalCloud;
pub use error::{StateError, StateResult};
pub use store::StateStore;
