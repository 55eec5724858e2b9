//! Plain snapshots carrying field values into the graph.
//!
//! Rows come from the store (or are built by hand in tests). `None` means the
//! field is null or absent; absorb skips such fields.

use crate::types::{OutputId, ScriptId, TxId};

use super::fields::{OutputField, TxField};

/// Snapshot of a transaction row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRow {
    pub id: TxId,
    pub txid: Option<String>,
    pub height: Option<u64>,
    pub input_count: Option<u32>,
    pub output_count: Option<u32>,
}

impl TxRow {
    /// A row carrying only an identity.
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            txid: None,
            height: None,
            input_count: None,
            output_count: None,
        }
    }

    /// Whether the snapshot carries a non-null value for `field`.
    ///
    /// Collection fields never appear in rows.
    pub fn has_field(&self, field: TxField) -> bool {
        match field {
            TxField::Txid => self.txid.is_some(),
            TxField::Height => self.height.is_some(),
            TxField::InputCount => self.input_count.is_some(),
            TxField::OutputCount => self.output_count.is_some(),
            _ => false,
        }
    }
}

/// Snapshot of an output row joined with its spending input, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRow {
    pub id: OutputId,
    pub funding_tx_id: Option<TxId>,
    pub vout: Option<u32>,
    pub script_id: Option<ScriptId>,
    pub sats: Option<u64>,
    pub input_id: Option<i64>,
    pub spending_tx_id: Option<TxId>,
    pub vin: Option<u32>,
    /// Settlement height: the spender's height, or the height as of which the
    /// output was last observed unspent.
    pub height: Option<u64>,
}

impl OutputRow {
    /// A row carrying only an identity.
    pub fn new(id: OutputId) -> Self {
        Self {
            id,
            funding_tx_id: None,
            vout: None,
            script_id: None,
            sats: None,
            input_id: None,
            spending_tx_id: None,
            vin: None,
            height: None,
        }
    }

    /// Whether the snapshot carries a non-null value for `field`.
    pub fn has_field(&self, field: OutputField) -> bool {
        match field {
            OutputField::FundingTxId => self.funding_tx_id.is_some(),
            OutputField::Vout => self.vout.is_some(),
            OutputField::ScriptId => self.script_id.is_some(),
            OutputField::Sats => self.sats.is_some(),
            OutputField::InputId => self.input_id.is_some(),
            OutputField::SpendingTxId => self.spending_tx_id.is_some(),
            OutputField::Vin => self.vin.is_some(),
            OutputField::Height => self.height.is_some(),
        }
    }
}

/// Pagination bookkeeping of a script, as stored.
///
/// All four markers travel together: the store's tuple is authoritative and
/// replaces the in-memory one, nulls included.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub contiguous_bound_tx_id: Option<TxId>,
    pub fetch_newest_tx_id: Option<TxId>,
    pub fetch_newest_tx_read_height: Option<u64>,
    pub fetch_oldest_tx_id: Option<TxId>,
}

/// Snapshot of a script row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptRow {
    pub id: ScriptId,
    pub address: Option<String>,
    /// `None` when the snapshot does not carry bookkeeping at all.
    pub pagination: Option<Pagination>,
}

impl ScriptRow {
    /// A row carrying only an identity.
    pub fn new(id: ScriptId) -> Self {
        Self {
            id,
            address: None,
            pagination: None,
        }
    }
}
