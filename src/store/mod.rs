//! Persistent, authoritative record of everything downloaded.
//!
//! The graph reads row snapshots from a [`Store`] and writes nothing but raw
//! remote responses; turning a response into rows is the store's job.

use crate::error::StoreError;
use crate::esplora::DEFAULT_PAGE_SIZE;
use crate::model::{OutputRow, ScriptRow, TxRow};
use crate::types::{OutputId, ResponseId, ScriptId, TxId};

mod ingest;
mod sqlite;

pub use sqlite::SqliteStore;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A multi-page history fetch left unfinished in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterruptedFetch {
    /// Address whose history was being downloaded.
    pub address: String,
    /// Hash of the oldest transaction fetched so far.
    pub oldest_txid: String,
}

/// Row-shaped access to downloaded data.
///
/// Reads return `Ok(None)` (or an empty list) for data that has not been
/// downloaded; that is distinct from an error.
pub trait Store {
    /// Transaction row by store identity.
    fn tx(&self, id: TxId) -> StoreResult<Option<TxRow>>;

    /// Transaction row by hash.
    fn tx_by_txid(&self, txid: &str) -> StoreResult<Option<TxRow>>;

    /// Outputs funded by `id`, ordered by output index.
    fn tx_outputs(&self, id: TxId) -> StoreResult<Vec<OutputRow>>;

    /// Outputs spent by `id`, ordered by input position.
    fn tx_inputs(&self, id: TxId) -> StoreResult<Vec<OutputRow>>;

    /// Output row, joined with its spending input.
    fn output(&self, id: OutputId) -> StoreResult<Option<OutputRow>>;

    /// Script row by store identity.
    fn script(&self, id: ScriptId) -> StoreResult<Option<ScriptRow>>;

    /// Script row by address.
    fn script_by_address(&self, address: &str) -> StoreResult<Option<ScriptRow>>;

    /// Known transactions funding outputs of `id`, newest first.
    fn script_funding_txs(&self, id: ScriptId) -> StoreResult<Vec<TxRow>>;

    /// Known transactions spending outputs of `id`, newest first.
    fn script_spending_txs(&self, id: ScriptId) -> StoreResult<Vec<TxRow>>;

    /// History fetches with an oldest-fetched marker still set.
    fn interrupted_fetches(&self) -> StoreResult<Vec<InterruptedFetch>>;

    /// Most recent chain tip height recorded.
    fn chain_tip(&self) -> StoreResult<Option<u64>>;

    /// Durably records a raw response for `path` and ingests it.
    fn insert_response(&self, path: &str, body: &str) -> StoreResult<ResponseId>;
}

/// Options used when opening a [`SqliteStore`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Address history pages shorter than this are the last page.
    pub page_size: usize,
}

impl StoreOptions {
    /// Sets the page size threshold.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}
