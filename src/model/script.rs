use crate::error::{GraphError, Result};
use crate::types::{EntityRef, ScriptId, TxId};

use super::cell::{OneShot, Volatile};
use super::fields::ScriptField;
use super::row::Pagination;

/// Canonical script entity.
///
/// Besides its address a script carries the bookkeeping of the paginated
/// download of its transaction history. Those markers settle over a
/// sequence of page fetches and are held in [`Volatile`] cells.
#[derive(Debug)]
pub struct Script {
    id: ScriptId,
    address: OneShot<String>,
    contiguous_bound_tx: Volatile<Option<TxId>>,
    fetch_newest_tx: Volatile<Option<TxId>>,
    fetch_newest_tx_read_height: Volatile<Option<u64>>,
    fetch_oldest_tx: Volatile<Option<TxId>>,
}

impl Script {
    /// Creates an entity with only its identity set.
    pub fn new(id: ScriptId) -> Self {
        Self {
            id,
            address: OneShot::new(),
            contiguous_bound_tx: Volatile::new(),
            fetch_newest_tx: Volatile::new(),
            fetch_newest_tx_read_height: Volatile::new(),
            fetch_oldest_tx: Volatile::new(),
        }
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub(crate) fn entity(&self) -> EntityRef {
        EntityRef::Script(self.id)
    }

    pub fn address(&self) -> &OneShot<String> {
        &self.address
    }

    /// Newest transaction below which the history is known to be complete.
    pub fn contiguous_bound_tx(&self) -> &Volatile<Option<TxId>> {
        &self.contiguous_bound_tx
    }

    /// First transaction of the fetch cycle in progress.
    pub fn fetch_newest_tx(&self) -> &Volatile<Option<TxId>> {
        &self.fetch_newest_tx
    }

    /// Height as of which the bound (or the cycle in progress) is valid.
    pub fn fetch_newest_tx_read_height(&self) -> &Volatile<Option<u64>> {
        &self.fetch_newest_tx_read_height
    }

    /// Oldest transaction fetched so far by the cycle in progress.
    pub fn fetch_oldest_tx(&self) -> &Volatile<Option<TxId>> {
        &self.fetch_oldest_tx
    }

    /// The bookkeeping tuple, once it has been read from the store.
    pub fn pagination(&self) -> Option<Pagination> {
        Some(Pagination {
            contiguous_bound_tx_id: self.contiguous_bound_tx.read_value()?,
            fetch_newest_tx_id: self.fetch_newest_tx.read_value()?,
            fetch_newest_tx_read_height: self.fetch_newest_tx_read_height.read_value()?,
            fetch_oldest_tx_id: self.fetch_oldest_tx.read_value()?,
        })
    }

    /// Replaces the bookkeeping tuple.
    ///
    /// The bound, once set, can move but never disappear, and the read
    /// height never decreases. Nothing is written when a guard fails.
    pub(crate) fn apply_pagination(&self, next: Pagination) -> Result<()> {
        if let Some(current) = self.pagination() {
            if current.contiguous_bound_tx_id.is_some() && next.contiguous_bound_tx_id.is_none() {
                return Err(GraphError::MonotonicityViolation {
                    entity: self.entity(),
                    field: ScriptField::ContiguousBoundTx.spec().name,
                });
            }
            if let (Some(prev), Some(new)) = (
                current.fetch_newest_tx_read_height,
                next.fetch_newest_tx_read_height,
            ) {
                if new < prev {
                    return Err(GraphError::MonotonicityViolation {
                        entity: self.entity(),
                        field: ScriptField::FetchNewestTxReadHeight.spec().name,
                    });
                }
            }
            if current.fetch_newest_tx_read_height.is_some()
                && next.fetch_newest_tx_read_height.is_none()
            {
                return Err(GraphError::MonotonicityViolation {
                    entity: self.entity(),
                    field: ScriptField::FetchNewestTxReadHeight.spec().name,
                });
            }
            if current == next {
                return Ok(());
            }
        }
        self.contiguous_bound_tx.complete(next.contiguous_bound_tx_id);
        self.fetch_newest_tx.complete(next.fetch_newest_tx_id);
        self.fetch_newest_tx_read_height
            .complete(next.fetch_newest_tx_read_height);
        self.fetch_oldest_tx.complete(next.fetch_oldest_tx_id);
        Ok(())
    }

    /// Non-blocking check whether `field` holds a value.
    pub fn has_value(&self, field: ScriptField) -> bool {
        match field {
            ScriptField::Address => self.address.has_value(),
            ScriptField::ContiguousBoundTx => self.contiguous_bound_tx.has_value(),
            ScriptField::FetchNewestTx => self.fetch_newest_tx.has_value(),
            ScriptField::FetchNewestTxReadHeight => self.fetch_newest_tx_read_height.has_value(),
            ScriptField::FetchOldestTx => self.fetch_oldest_tx.has_value(),
        }
    }

    pub(crate) fn fail(&self, field: ScriptField, err: GraphError) {
        match field {
            ScriptField::Address => self.address.fail(err),
            ScriptField::ContiguousBoundTx => self.contiguous_bound_tx.fail(err),
            ScriptField::FetchNewestTx => self.fetch_newest_tx.fail(err),
            ScriptField::FetchNewestTxReadHeight => self.fetch_newest_tx_read_height.fail(err),
            ScriptField::FetchOldestTx => self.fetch_oldest_tx.fail(err),
        }
    }

    fn marker(&self, field: ScriptField) -> Option<MarkerCell<'_>> {
        match field {
            ScriptField::Address => None,
            ScriptField::ContiguousBoundTx => Some(MarkerCell::Tx(&self.contiguous_bound_tx)),
            ScriptField::FetchNewestTx => Some(MarkerCell::Tx(&self.fetch_newest_tx)),
            ScriptField::FetchNewestTxReadHeight => {
                Some(MarkerCell::Height(&self.fetch_newest_tx_read_height))
            }
            ScriptField::FetchOldestTx => Some(MarkerCell::Tx(&self.fetch_oldest_tx)),
        }
    }

    /// Holds readers of a pagination marker until the history load running
    /// for it finishes.
    pub(crate) fn begin_refresh(&self, field: ScriptField) {
        match self.marker(field) {
            Some(MarkerCell::Tx(cell)) => cell.begin_refresh(),
            Some(MarkerCell::Height(cell)) => cell.begin_refresh(),
            None => {}
        }
    }

    /// Releases readers held by [`Script::begin_refresh`] with the current value.
    pub(crate) fn settle(&self, field: ScriptField) {
        match self.marker(field) {
            Some(MarkerCell::Tx(cell)) => cell.settle(),
            Some(MarkerCell::Height(cell)) => cell.settle(),
            None => {}
        }
    }

    pub(crate) fn clear_failure(&self, field: ScriptField) {
        match field {
            ScriptField::Address => self.address.clear_failure(),
            ScriptField::ContiguousBoundTx => self.contiguous_bound_tx.clear_failure(),
            ScriptField::FetchNewestTx => self.fetch_newest_tx.clear_failure(),
            ScriptField::FetchNewestTxReadHeight => {
                self.fetch_newest_tx_read_height.clear_failure()
            }
            ScriptField::FetchOldestTx => self.fetch_oldest_tx.clear_failure(),
        }
    }
}

enum MarkerCell<'a> {
    Tx(&'a Volatile<Option<TxId>>),
    Height(&'a Volatile<Option<u64>>),
}
