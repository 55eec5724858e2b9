use std::collections::BTreeSet;

use crate::error::GraphError;
use crate::types::{EntityRef, OutputId, TxId};

use super::cell::{Monotonic, OneShot};
use super::fields::{join_fn, TxField};

/// Which side of a transaction a collection belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Io {
    /// Outputs spent by the transaction.
    Inputs,
    /// Outputs created by the transaction.
    Outputs,
}

impl Io {
    pub(crate) fn count_field(self) -> TxField {
        match self {
            Io::Inputs => TxField::InputCount,
            Io::Outputs => TxField::OutputCount,
        }
    }

    pub(crate) fn tuple_field(self) -> TxField {
        match self {
            Io::Inputs => TxField::Inputs,
            Io::Outputs => TxField::Outputs,
        }
    }

    pub(crate) fn partial_field(self) -> TxField {
        match self {
            Io::Inputs => TxField::PartialInputs,
            Io::Outputs => TxField::PartialOutputs,
        }
    }
}

/// The cells making up one side of a transaction.
pub(crate) struct IoCells<'a> {
    pub count: &'a OneShot<u32>,
    pub tuple: &'a OneShot<Vec<OutputId>>,
    pub partial: &'a Monotonic<BTreeSet<OutputId>>,
}

/// Canonical transaction entity.
///
/// `inputs`/`outputs` are only set once the matching count is known and the
/// corresponding partial set has reached it; until then related outputs
/// accumulate in `partial_inputs`/`partial_outputs`.
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    txid: OneShot<String>,
    height: OneShot<u64>,
    input_count: OneShot<u32>,
    output_count: OneShot<u32>,
    inputs: OneShot<Vec<OutputId>>,
    outputs: OneShot<Vec<OutputId>>,
    partial_inputs: Monotonic<BTreeSet<OutputId>>,
    partial_outputs: Monotonic<BTreeSet<OutputId>>,
}

impl Transaction {
    /// Creates an entity with only its identity set.
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            txid: OneShot::new(),
            height: OneShot::new(),
            input_count: OneShot::new(),
            output_count: OneShot::new(),
            inputs: OneShot::new(),
            outputs: OneShot::new(),
            partial_inputs: Monotonic::new(BTreeSet::new(), join_fn),
            partial_outputs: Monotonic::new(BTreeSet::new(), join_fn),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub(crate) fn entity(&self) -> EntityRef {
        EntityRef::Tx(self.id)
    }

    /// Transaction hash.
    pub fn txid(&self) -> &OneShot<String> {
        &self.txid
    }

    /// Confirmation height.
    pub fn height(&self) -> &OneShot<u64> {
        &self.height
    }

    pub fn input_count(&self) -> &OneShot<u32> {
        &self.input_count
    }

    pub fn output_count(&self) -> &OneShot<u32> {
        &self.output_count
    }

    /// Spent outputs ordered by input position.
    pub fn inputs(&self) -> &OneShot<Vec<OutputId>> {
        &self.inputs
    }

    /// Created outputs ordered by output index.
    pub fn outputs(&self) -> &OneShot<Vec<OutputId>> {
        &self.outputs
    }

    pub fn partial_inputs(&self) -> &Monotonic<BTreeSet<OutputId>> {
        &self.partial_inputs
    }

    pub fn partial_outputs(&self) -> &Monotonic<BTreeSet<OutputId>> {
        &self.partial_outputs
    }

    pub(crate) fn side(&self, io: Io) -> IoCells<'_> {
        match io {
            Io::Inputs => IoCells {
                count: &self.input_count,
                tuple: &self.inputs,
                partial: &self.partial_inputs,
            },
            Io::Outputs => IoCells {
                count: &self.output_count,
                tuple: &self.outputs,
                partial: &self.partial_outputs,
            },
        }
    }

    /// Non-blocking check whether `field` holds a value.
    pub fn has_value(&self, field: TxField) -> bool {
        match field {
            TxField::Txid => self.txid.has_value(),
            TxField::Height => self.height.has_value(),
            TxField::InputCount => self.input_count.has_value(),
            TxField::OutputCount => self.output_count.has_value(),
            TxField::Inputs => self.inputs.has_value(),
            TxField::Outputs => self.outputs.has_value(),
            TxField::PartialInputs => self.partial_inputs.has_value(),
            TxField::PartialOutputs => self.partial_outputs.has_value(),
        }
    }

    /// Whether a load for `field` would be redundant.
    pub(crate) fn is_resolved(&self, field: TxField) -> bool {
        match field {
            TxField::PartialInputs => self.partial_inputs.is_joined(),
            TxField::PartialOutputs => self.partial_outputs.is_joined(),
            other => self.has_value(other),
        }
    }

    pub(crate) fn fail(&self, field: TxField, err: GraphError) {
        match field {
            TxField::Txid => self.txid.fail(err),
            TxField::Height => self.height.fail(err),
            TxField::InputCount => self.input_count.fail(err),
            TxField::OutputCount => self.output_count.fail(err),
            TxField::Inputs => self.inputs.fail(err),
            TxField::Outputs => self.outputs.fail(err),
            TxField::PartialInputs => self.partial_inputs.fail(err),
            TxField::PartialOutputs => self.partial_outputs.fail(err),
        }
    }

    pub(crate) fn clear_failure(&self, field: TxField) {
        match field {
            TxField::Txid => self.txid.clear_failure(),
            TxField::Height => self.height.clear_failure(),
            TxField::InputCount => self.input_count.clear_failure(),
            TxField::OutputCount => self.output_count.clear_failure(),
            TxField::Inputs => self.inputs.clear_failure(),
            TxField::Outputs => self.outputs.clear_failure(),
            TxField::PartialInputs => self.partial_inputs.clear_failure(),
            TxField::PartialOutputs => self.partial_outputs.clear_failure(),
        }
    }
}
