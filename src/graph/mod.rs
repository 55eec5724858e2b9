//! In-memory graph of canonical entities and the unifier that merges
//! snapshots into it.
//!
//! The graph is an arena: one [`Registry`] per entity kind, and every
//! relationship is held as a typed id. Unification is a pure in-memory step:
//! it never blocks and never performs I/O, and an integrity violation aborts
//! the call with an error (fields absorbed before the violation stay set).

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::model::fields::{set_idempotent, set_union};
use crate::model::{
    Io, MaxHeight, Output, OutputField, OutputRow, Script, ScriptField, ScriptRow, Transaction,
    TxField, TxRow,
};
use crate::types::{EntityKind, EntityRef, OutputId, ScriptId, TxId};

mod registry;

pub use registry::{Keyed, Registry};

/// An entity kind that can be unified from a snapshot.
pub trait Unify: Keyed + Sized + 'static {
    /// Snapshot type carrying this kind's fields.
    type Row;
    /// Identity carried by a snapshot.
    fn row_id(row: &Self::Row) -> Self::Id;
    /// The graph's registry for this kind.
    fn registry(graph: &Graph) -> &Registry<Self>;
    /// Applies every non-null snapshot field using the field's discipline.
    fn absorb(graph: &Graph, node: &Self, row: &Self::Row) -> Result<()>;
    /// Relationships established from the snapshot's foreign keys.
    fn foreign_keys() -> &'static [ForeignKey<Self>];
}

/// A relationship declared by an entity kind.
pub struct ForeignKey<E: Unify> {
    /// Relationship field name.
    pub field: &'static str,
    /// Kind of the related entity.
    pub target: EntityKind,
    /// Reads the foreign-key scalar from a snapshot.
    pub key: fn(&E::Row) -> Option<i64>,
    /// Resolves the related entity and assigns the relationship, with its side effects.
    pub link: fn(&Graph, &E, i64) -> Result<()>,
}

/// The canonical entity graph.
#[derive(Default)]
pub struct Graph {
    txs: Registry<Transaction>,
    outputs: Registry<Output>,
    scripts: Registry<Script>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds or creates the canonical transaction for `id`.
    pub fn tx(&self, id: TxId) -> Rc<Transaction> {
        self.txs.find_or_create(id)
    }

    /// Finds or creates the canonical output for `id`.
    pub fn output(&self, id: OutputId) -> Rc<Output> {
        self.outputs.find_or_create(id)
    }

    /// Finds or creates the canonical script for `id`.
    pub fn script(&self, id: ScriptId) -> Rc<Script> {
        self.scripts.find_or_create(id)
    }

    pub fn txs(&self) -> &Registry<Transaction> {
        &self.txs
    }

    pub fn outputs(&self) -> &Registry<Output> {
        &self.outputs
    }

    pub fn scripts(&self) -> &Registry<Script> {
        &self.scripts
    }

    /// Merges `row` into the canonical entity with the same identity and
    /// links its foreign keys. Returns the canonical entity.
    pub fn unify<E: Unify>(&self, row: &E::Row) -> Result<Rc<E>> {
        let node = E::registry(self).find_or_create(E::row_id(row));
        E::absorb(self, &node, row)?;
        for fk in E::foreign_keys() {
            if let Some(key) = (fk.key)(row) {
                trace!(kind = E::KIND.name(), field = fk.field, key, "linking foreign key");
                (fk.link)(self, &node, key)?;
            }
        }
        Ok(node)
    }

    /// Incorporates a transaction snapshot.
    pub fn link_tx(&self, row: &TxRow) -> Result<Rc<Transaction>> {
        self.unify::<Transaction>(row)
    }

    /// Incorporates an output snapshot, linking its funding transaction,
    /// spending transaction and script.
    pub fn link_output(&self, row: &OutputRow) -> Result<Rc<Output>> {
        self.unify::<Output>(row)
    }

    /// Incorporates a script snapshot, linking its pagination markers.
    pub fn link_script(&self, row: &ScriptRow) -> Result<Rc<Script>> {
        self.unify::<Script>(row)
    }

    /// Sets a transaction's input or output count, promoting the partial
    /// set if it already has that many members.
    pub fn set_count(&self, tx: &Transaction, io: Io, count: u32) -> Result<()> {
        let side = tx.side(io);
        set_idempotent(side.count, count, tx.entity(), io.count_field().spec().name)?;
        self.add_partial(tx, io, &BTreeSet::new())
    }

    /// Sets the final ordered collection of one side of a transaction.
    ///
    /// Assigns every member's funding (or spending) transaction and the
    /// count. Members are ordered by output index (or input position).
    pub fn set_collection(&self, tx: &Transaction, io: Io, members: &[OutputId]) -> Result<()> {
        let set: BTreeSet<OutputId> = members.iter().copied().collect();
        let field = io.tuple_field().spec().name;
        if set.len() != members.len() {
            return Err(GraphError::Conflict {
                entity: tx.entity(),
                field,
            });
        }
        let ordered = self.order_members(tx, io, &set)?;
        if let Some(current) = tx.side(io).tuple.read_value() {
            if current != ordered {
                return Err(GraphError::Conflict {
                    entity: tx.entity(),
                    field,
                });
            }
        }
        for &id in &ordered {
            let output = self.output(id);
            match io {
                Io::Outputs => self.assign_funding_tx(&output, tx.id())?,
                Io::Inputs => self.assign_spending_tx(&output, tx.id())?,
            }
        }
        set_idempotent(tx.side(io).tuple, ordered, tx.entity(), field)?;
        self.set_count(tx, io, members.len() as u32)
    }

    /// Adds members to one side's partial set, assigning their relationship
    /// to `tx` first.
    pub fn add_members(&self, tx: &Transaction, io: Io, members: &[OutputId]) -> Result<()> {
        for &id in members {
            let output = self.output(id);
            match io {
                Io::Outputs => self.assign_funding_tx(&output, tx.id())?,
                Io::Inputs => self.assign_spending_tx(&output, tx.id())?,
            }
        }
        Ok(())
    }

    /// Associates an output with its funding transaction and adds it to that
    /// transaction's partial output set.
    pub fn assign_funding_tx(&self, output: &Output, tx_id: TxId) -> Result<()> {
        set_idempotent(
            output.funding_tx_id(),
            tx_id,
            output.entity(),
            OutputField::FundingTxId.spec().name,
        )?;
        let tx = self.tx(tx_id);
        self.add_partial(&tx, Io::Outputs, &BTreeSet::from([output.id()]))
    }

    /// Associates an output with its spending transaction, adds it to that
    /// transaction's partial input set and ties the output's settlement
    /// height to the spender's height when it is known.
    pub fn assign_spending_tx(&self, output: &Output, tx_id: TxId) -> Result<()> {
        set_idempotent(
            output.spending_tx_id(),
            tx_id,
            output.entity(),
            OutputField::SpendingTxId.spec().name,
        )?;
        let tx = self.tx(tx_id);
        self.add_partial(&tx, Io::Inputs, &BTreeSet::from([output.id()]))?;
        if let Some(height) = tx.height().read_value() {
            self.set_settlement_height(output, height)?;
        }
        Ok(())
    }

    /// Associates an output with its script.
    pub fn assign_script(&self, output: &Output, script_id: ScriptId) -> Result<()> {
        set_idempotent(
            output.script_id(),
            script_id,
            output.entity(),
            OutputField::ScriptId.spec().name,
        )?;
        self.script(script_id);
        Ok(())
    }

    /// Records the height as of which an output's spend status is known.
    ///
    /// Once the output is spent the height is the spender's height, which is
    /// idempotent; before that it may only increase.
    pub fn set_settlement_height(&self, output: &Output, height: u64) -> Result<()> {
        if let Some(spender) = output.spending_tx_id().read_value() {
            let tx = self.tx(spender);
            set_idempotent(
                tx.height(),
                height,
                tx.entity(),
                TxField::Height.spec().name,
            )?;
        }
        if height < output.height().read_value().0 {
            return Err(GraphError::MonotonicityViolation {
                entity: output.entity(),
                field: OutputField::Height.spec().name,
            });
        }
        output.height().update(&MaxHeight(height));
        Ok(())
    }

    fn add_partial(&self, tx: &Transaction, io: Io, members: &BTreeSet<OutputId>) -> Result<()> {
        let side = tx.side(io);
        let union: BTreeSet<OutputId> = side.partial.read_value().union(members).copied().collect();
        if let Some(count) = side.count.read_value() {
            let count = count as usize;
            if union.len() > count {
                return Err(GraphError::OversizedCollection {
                    entity: tx.entity(),
                    field: io.partial_field().spec().name,
                    count,
                    len: union.len(),
                });
            }
            if union.len() == count && !side.tuple.has_value() {
                let ordered = self.order_members(tx, io, &union)?;
                trace!(tx = %tx.id(), ?io, count, "promoting partial set");
                set_idempotent(side.tuple, ordered, tx.entity(), io.tuple_field().spec().name)?;
            }
        }
        // a finalized collection marks the partial set settled, even when empty
        if !members.is_empty() || side.tuple.has_value() {
            set_union(side.partial, members);
        }
        Ok(())
    }

    fn order_members(
        &self,
        tx: &Transaction,
        io: Io,
        members: &BTreeSet<OutputId>,
    ) -> Result<Vec<OutputId>> {
        let mut keyed = Vec::with_capacity(members.len());
        for &id in members {
            let output = self.output(id);
            let (index, field) = match io {
                Io::Outputs => (output.vout().read_value(), OutputField::Vout),
                Io::Inputs => (output.vin().read_value(), OutputField::Vin),
            };
            let index = index.ok_or(GraphError::Unresolved {
                entity: EntityRef::Output(id),
                field: field.spec().name,
            })?;
            keyed.push((index, id));
        }
        keyed.sort_unstable();
        if keyed.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(GraphError::Conflict {
                entity: tx.entity(),
                field: io.tuple_field().spec().name,
            });
        }
        Ok(keyed.into_iter().map(|(_, id)| id).collect())
    }
}

impl Unify for Transaction {
    type Row = TxRow;

    fn row_id(row: &TxRow) -> TxId {
        row.id
    }

    fn registry(graph: &Graph) -> &Registry<Self> {
        &graph.txs
    }

    fn absorb(graph: &Graph, tx: &Self, row: &TxRow) -> Result<()> {
        let entity = tx.entity();
        if let Some(txid) = &row.txid {
            set_idempotent(tx.txid(), txid.clone(), entity, TxField::Txid.spec().name)?;
        }
        if let Some(height) = row.height {
            if set_idempotent(tx.height(), height, entity, TxField::Height.spec().name)? {
                // spent outputs settle at the spender's height
                for id in tx.partial_inputs().read_value() {
                    graph.set_settlement_height(&graph.output(id), height)?;
                }
            }
        }
        if let Some(count) = row.input_count {
            graph.set_count(tx, Io::Inputs, count)?;
        }
        if let Some(count) = row.output_count {
            graph.set_count(tx, Io::Outputs, count)?;
        }
        Ok(())
    }

    fn foreign_keys() -> &'static [ForeignKey<Self>] {
        &[]
    }
}

impl Unify for Output {
    type Row = OutputRow;

    fn row_id(row: &OutputRow) -> OutputId {
        row.id
    }

    fn registry(graph: &Graph) -> &Registry<Self> {
        &graph.outputs
    }

    fn absorb(graph: &Graph, output: &Self, row: &OutputRow) -> Result<()> {
        let entity = output.entity();
        let name = |field: OutputField| field.spec().name;
        if let Some(id) = row.funding_tx_id {
            set_idempotent(output.funding_tx_id(), id, entity, name(OutputField::FundingTxId))?;
        }
        if let Some(vout) = row.vout {
            set_idempotent(output.vout(), vout, entity, name(OutputField::Vout))?;
        }
        if let Some(id) = row.script_id {
            set_idempotent(output.script_id(), id, entity, name(OutputField::ScriptId))?;
        }
        if let Some(sats) = row.sats {
            set_idempotent(output.sats(), sats, entity, name(OutputField::Sats))?;
        }
        if let Some(input_id) = row.input_id {
            set_idempotent(output.input_id(), input_id, entity, name(OutputField::InputId))?;
        }
        if let Some(id) = row.spending_tx_id {
            set_idempotent(output.spending_tx_id(), id, entity, name(OutputField::SpendingTxId))?;
        }
        if let Some(vin) = row.vin {
            set_idempotent(output.vin(), vin, entity, name(OutputField::Vin))?;
        }
        if let Some(height) = row.height {
            graph.set_settlement_height(output, height)?;
        }
        Ok(())
    }

    fn foreign_keys() -> &'static [ForeignKey<Self>] {
        &OUTPUT_FOREIGN_KEYS
    }
}

static OUTPUT_FOREIGN_KEYS: [ForeignKey<Output>; 3] = [
    ForeignKey {
        field: "funding_tx",
        target: EntityKind::Tx,
        key: output_funding_key,
        link: link_funding_tx,
    },
    ForeignKey {
        field: "spending_tx",
        target: EntityKind::Tx,
        key: output_spending_key,
        link: link_spending_tx,
    },
    ForeignKey {
        field: "script",
        target: EntityKind::Script,
        key: output_script_key,
        link: link_output_script,
    },
];

fn output_funding_key(row: &OutputRow) -> Option<i64> {
    row.funding_tx_id.map(|id| id.0)
}

fn output_spending_key(row: &OutputRow) -> Option<i64> {
    row.spending_tx_id.map(|id| id.0)
}

fn output_script_key(row: &OutputRow) -> Option<i64> {
    row.script_id.map(|id| id.0)
}

fn link_funding_tx(graph: &Graph, output: &Output, key: i64) -> Result<()> {
    graph.assign_funding_tx(output, TxId(key))
}

fn link_spending_tx(graph: &Graph, output: &Output, key: i64) -> Result<()> {
    graph.assign_spending_tx(output, TxId(key))
}

fn link_output_script(graph: &Graph, output: &Output, key: i64) -> Result<()> {
    graph.assign_script(output, ScriptId(key))
}

impl Unify for Script {
    type Row = ScriptRow;

    fn row_id(row: &ScriptRow) -> ScriptId {
        row.id
    }

    fn registry(graph: &Graph) -> &Registry<Self> {
        &graph.scripts
    }

    fn absorb(_graph: &Graph, script: &Self, row: &ScriptRow) -> Result<()> {
        if let Some(address) = &row.address {
            set_idempotent(
                script.address(),
                address.clone(),
                script.entity(),
                ScriptField::Address.spec().name,
            )?;
        }
        if let Some(pagination) = row.pagination {
            script.apply_pagination(pagination)?;
        }
        Ok(())
    }

    fn foreign_keys() -> &'static [ForeignKey<Self>] {
        &SCRIPT_FOREIGN_KEYS
    }
}

static SCRIPT_FOREIGN_KEYS: [ForeignKey<Script>; 3] = [
    ForeignKey {
        field: "contiguous_bound_tx",
        target: EntityKind::Tx,
        key: script_bound_key,
        link: link_marker_tx,
    },
    ForeignKey {
        field: "fetch_newest_tx",
        target: EntityKind::Tx,
        key: script_newest_key,
        link: link_marker_tx,
    },
    ForeignKey {
        field: "fetch_oldest_tx",
        target: EntityKind::Tx,
        key: script_oldest_key,
        link: link_marker_tx,
    },
];

fn script_bound_key(row: &ScriptRow) -> Option<i64> {
    row.pagination
        .and_then(|p| p.contiguous_bound_tx_id)
        .map(|id| id.0)
}

fn script_newest_key(row: &ScriptRow) -> Option<i64> {
    row.pagination
        .and_then(|p| p.fetch_newest_tx_id)
        .map(|id| id.0)
}

fn script_oldest_key(row: &ScriptRow) -> Option<i64> {
    row.pagination
        .and_then(|p| p.fetch_oldest_tx_id)
        .map(|id| id.0)
}

/// Pagination markers are replaced wholesale during absorb; linking only
/// makes sure the marker transaction has a canonical entity.
fn link_marker_tx(graph: &Graph, _script: &Script, key: i64) -> Result<()> {
    graph.tx(TxId(key));
    Ok(())
}
