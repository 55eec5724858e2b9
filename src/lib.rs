//! Lazily populated Bitcoin transaction graph.
//!
//! Transactions, outputs and scripts are unified into one canonical object
//! per identity. Their fields fill in as loads complete: from the local
//! SQLite store first, then from an Esplora-compatible API whose responses
//! are recorded in the store.

#![warn(missing_docs)]

pub mod config;
/// Graph and store error types.
pub mod error;
pub mod esplora;
pub mod graph;
pub mod lazy;
pub mod model;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::{GraphError, Result, StoreError};
pub use esplora::{FetchError, HttpClient, RemoteClient, Request, StaticClient};
pub use graph::Graph;
pub use lazy::{FetchState, LazyOutput, LazyScript, LazyTx, Orchestrator};
pub use model::{OutputField, ScriptField, TxField};
pub use store::{SqliteStore, Store, StoreOptions};
pub use types::{EntityKind, EntityRef, OutputId, ResponseId, ScriptId, TxId};
