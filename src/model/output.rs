use crate::error::GraphError;
use crate::types::{EntityRef, OutputId, ScriptId, TxId};

use super::cell::{Monotonic, OneShot};
use super::fields::{join_fn, MaxHeight, OutputField};

/// Canonical output entity.
///
/// Relationships to the funding transaction, the spending transaction and
/// the script are held as typed ids; resolving one means looking the id up
/// in the graph.
#[derive(Debug)]
pub struct Output {
    id: OutputId,
    funding_tx_id: OneShot<TxId>,
    vout: OneShot<u32>,
    script_id: OneShot<ScriptId>,
    sats: OneShot<u64>,
    input_id: OneShot<i64>,
    spending_tx_id: OneShot<TxId>,
    vin: OneShot<u32>,
    height: Monotonic<MaxHeight>,
}

impl Output {
    /// Creates an entity with only its identity set.
    pub fn new(id: OutputId) -> Self {
        Self {
            id,
            funding_tx_id: OneShot::new(),
            vout: OneShot::new(),
            script_id: OneShot::new(),
            sats: OneShot::new(),
            input_id: OneShot::new(),
            spending_tx_id: OneShot::new(),
            vin: OneShot::new(),
            height: Monotonic::new(MaxHeight(0), join_fn),
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub(crate) fn entity(&self) -> EntityRef {
        EntityRef::Output(self.id)
    }

    pub fn funding_tx_id(&self) -> &OneShot<TxId> {
        &self.funding_tx_id
    }

    pub fn vout(&self) -> &OneShot<u32> {
        &self.vout
    }

    pub fn script_id(&self) -> &OneShot<ScriptId> {
        &self.script_id
    }

    /// Value in satoshis.
    pub fn sats(&self) -> &OneShot<u64> {
        &self.sats
    }

    /// Store id of the spending input row.
    pub fn input_id(&self) -> &OneShot<i64> {
        &self.input_id
    }

    pub fn spending_tx_id(&self) -> &OneShot<TxId> {
        &self.spending_tx_id
    }

    /// Position of the output among the spending transaction's inputs.
    pub fn vin(&self) -> &OneShot<u32> {
        &self.vin
    }

    /// Settlement height: may only grow while unspent, fixed once spent.
    pub fn height(&self) -> &Monotonic<MaxHeight> {
        &self.height
    }

    /// Whether a spending transaction is known.
    pub fn is_spent(&self) -> bool {
        self.spending_tx_id.has_value()
    }

    /// Non-blocking check whether `field` holds a value.
    pub fn has_value(&self, field: OutputField) -> bool {
        match field {
            OutputField::FundingTxId => self.funding_tx_id.has_value(),
            OutputField::Vout => self.vout.has_value(),
            OutputField::ScriptId => self.script_id.has_value(),
            OutputField::Sats => self.sats.has_value(),
            OutputField::InputId => self.input_id.has_value(),
            OutputField::SpendingTxId => self.spending_tx_id.has_value(),
            OutputField::Vin => self.vin.has_value(),
            OutputField::Height => self.height.has_value(),
        }
    }

    pub(crate) fn is_resolved(&self, field: OutputField) -> bool {
        match field {
            OutputField::Height => self.height.is_joined(),
            other => self.has_value(other),
        }
    }

    pub(crate) fn fail(&self, field: OutputField, err: GraphError) {
        match field {
            OutputField::FundingTxId => self.funding_tx_id.fail(err),
            OutputField::Vout => self.vout.fail(err),
            OutputField::ScriptId => self.script_id.fail(err),
            OutputField::Sats => self.sats.fail(err),
            OutputField::InputId => self.input_id.fail(err),
            OutputField::SpendingTxId => self.spending_tx_id.fail(err),
            OutputField::Vin => self.vin.fail(err),
            OutputField::Height => self.height.fail(err),
        }
    }

    pub(crate) fn clear_failure(&self, field: OutputField) {
        match field {
            OutputField::FundingTxId => self.funding_tx_id.clear_failure(),
            OutputField::Vout => self.vout.clear_failure(),
            OutputField::ScriptId => self.script_id.clear_failure(),
            OutputField::Sats => self.sats.clear_failure(),
            OutputField::InputId => self.input_id.clear_failure(),
            OutputField::SpendingTxId => self.spending_tx_id.clear_failure(),
            OutputField::Vin => self.vin.clear_failure(),
            OutputField::Height => self.height.clear_failure(),
        }
    }
}
