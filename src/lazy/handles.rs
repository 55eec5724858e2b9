//! Async handles over canonical entities.
//!
//! Each accessor schedules a load of its field when needed and then awaits
//! the field's cell. Fields that may legitimately never be set (the height of
//! an unconfirmed transaction, the spender of an unspent output) suspend
//! until some later load sets them.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::model::{Output, OutputField, Script, ScriptField, Transaction, TxField, TxRow};
use crate::types::{OutputId, ScriptId, TxId};

use super::{FetchState, Orchestrator, Target};

/// Lazily loaded transaction.
#[derive(Clone)]
pub struct LazyTx {
    orch: Orchestrator,
    tx: Rc<Transaction>,
}

impl LazyTx {
    pub(super) fn new(orch: Orchestrator, tx: Rc<Transaction>) -> Self {
        Self { orch, tx }
    }

    pub fn id(&self) -> TxId {
        self.tx.id()
    }

    /// The canonical entity, for non-blocking reads.
    pub fn entity(&self) -> &Rc<Transaction> {
        &self.tx
    }

    /// Schedules a load of `field` if it is not resolved and no load is
    /// running, and returns the entity so the field's cell can be observed.
    pub fn load(&self, field: TxField) -> &Transaction {
        self.orch.schedule(Target::Tx(Rc::clone(&self.tx), field));
        &self.tx
    }

    /// Non-blocking readiness check.
    pub fn has_value(&self, field: TxField) -> bool {
        self.tx.has_value(field)
    }

    pub async fn txid(&self) -> Result<String> {
        self.load(TxField::Txid).txid().await_value().await
    }

    /// Confirmation height; suspends while the transaction is unconfirmed.
    pub async fn height(&self) -> Result<u64> {
        self.load(TxField::Height).height().await_value().await
    }

    pub async fn input_count(&self) -> Result<u32> {
        self.load(TxField::InputCount).input_count().await_value().await
    }

    pub async fn output_count(&self) -> Result<u32> {
        self.load(TxField::OutputCount).output_count().await_value().await
    }

    /// Spent outputs, in input order.
    pub async fn inputs(&self) -> Result<Vec<LazyOutput>> {
        let ids = self.load(TxField::Inputs).inputs().await_value().await?;
        Ok(ids.into_iter().map(|id| self.orch.output(id)).collect())
    }

    /// Created outputs, in output index order.
    pub async fn outputs(&self) -> Result<Vec<LazyOutput>> {
        let ids = self.load(TxField::Outputs).outputs().await_value().await?;
        Ok(ids.into_iter().map(|id| self.orch.output(id)).collect())
    }

    /// Inputs known so far. Never blocks.
    pub fn partial_inputs(&self) -> BTreeSet<OutputId> {
        self.load(TxField::PartialInputs).partial_inputs().read_value()
    }

    /// Outputs known so far. Never blocks.
    pub fn partial_outputs(&self) -> BTreeSet<OutputId> {
        self.load(TxField::PartialOutputs).partial_outputs().read_value()
    }
}

impl fmt::Debug for LazyTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LazyTx").field(&self.tx).finish()
    }
}

/// Lazily loaded output.
#[derive(Clone)]
pub struct LazyOutput {
    orch: Orchestrator,
    output: Rc<Output>,
}

impl LazyOutput {
    pub(super) fn new(orch: Orchestrator, output: Rc<Output>) -> Self {
        Self { orch, output }
    }

    pub fn id(&self) -> OutputId {
        self.output.id()
    }

    /// The canonical entity, for non-blocking reads.
    pub fn entity(&self) -> &Rc<Output> {
        &self.output
    }

    /// Schedules a load of `field` if needed; see [`LazyTx::load`].
    pub fn load(&self, field: OutputField) -> &Output {
        self.orch
            .schedule(Target::Output(Rc::clone(&self.output), field));
        &self.output
    }

    /// Non-blocking readiness check.
    pub fn has_value(&self, field: OutputField) -> bool {
        self.output.has_value(field)
    }

    pub async fn vout(&self) -> Result<u32> {
        self.load(OutputField::Vout).vout().await_value().await
    }

    pub async fn sats(&self) -> Result<u64> {
        self.load(OutputField::Sats).sats().await_value().await
    }

    pub async fn funding_tx(&self) -> Result<LazyTx> {
        let id = self
            .load(OutputField::FundingTxId)
            .funding_tx_id()
            .await_value()
            .await?;
        Ok(self.orch.tx(id))
    }

    pub async fn script(&self) -> Result<LazyScript> {
        let id = self
            .load(OutputField::ScriptId)
            .script_id()
            .await_value()
            .await?;
        Ok(self.orch.script(id))
    }

    /// Position of the spending input; suspends while the output is unspent.
    pub async fn vin(&self) -> Result<u32> {
        self.load(OutputField::Vin).vin().await_value().await
    }

    /// Spending transaction; suspends while the output is unspent. Use
    /// [`LazyOutput::spend_status`] to distinguish unspent outputs.
    pub async fn spending_tx(&self) -> Result<LazyTx> {
        let id = self
            .load(OutputField::SpendingTxId)
            .spending_tx_id()
            .await_value()
            .await?;
        Ok(self.orch.tx(id))
    }

    /// Settlement height known so far. Never blocks.
    pub fn height(&self) -> u64 {
        self.load(OutputField::Height).height().read_value().0
    }

    /// Loads the spend status now and returns the spender, or `None` if the
    /// output was unspent when last checked.
    pub async fn spend_status(&self) -> Result<Option<LazyTx>> {
        self.orch
            .load_output_row(&self.output, OutputField::SpendingTxId)
            .await?;
        Ok(self
            .output
            .spending_tx_id()
            .read_value()
            .map(|id| self.orch.tx(id)))
    }
}

impl fmt::Debug for LazyOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LazyOutput").field(&self.output).finish()
    }
}

/// Lazily loaded script.
#[derive(Clone)]
pub struct LazyScript {
    orch: Orchestrator,
    script: Rc<Script>,
}

impl LazyScript {
    pub(super) fn new(orch: Orchestrator, script: Rc<Script>) -> Self {
        Self { orch, script }
    }

    pub fn id(&self) -> ScriptId {
        self.script.id()
    }

    /// The canonical entity, for non-blocking reads.
    pub fn entity(&self) -> &Rc<Script> {
        &self.script
    }

    /// Schedules a load of `field` if needed; see [`LazyTx::load`].
    pub fn load(&self, field: ScriptField) -> &Script {
        self.orch
            .schedule(Target::Script(Rc::clone(&self.script), field));
        &self.script
    }

    /// Non-blocking readiness check.
    pub fn has_value(&self, field: ScriptField) -> bool {
        self.script.has_value(field)
    }

    /// Address; suspends for scripts that have none.
    pub async fn address(&self) -> Result<String> {
        self.load(ScriptField::Address).address().await_value().await
    }

    /// Current freshness relative to `required`. Never blocks.
    pub fn state(&self, required: Option<u64>) -> FetchState {
        FetchState::classify(&self.script, required)
    }

    /// Downloads whatever history is missing or stale as of `required`.
    /// Fails with `Unresolved` for a script without an address.
    pub async fn sync_history(&self, required: Option<u64>) -> Result<FetchState> {
        let address = self.orch.script_address(&self.script)?;
        self.orch.sync_script(&self.script, &address, required).await
    }

    /// The newest transaction below which the history is complete, once the
    /// history has been synced.
    pub async fn contiguous_bound_tx(&self) -> Result<Option<LazyTx>> {
        self.sync_history(None).await?;
        Ok(self
            .script
            .contiguous_bound_tx()
            .read_value()
            .flatten()
            .map(|id| self.orch.tx(id)))
    }

    /// Syncs the history as of `required` and returns every known
    /// transaction funding or spending this script, newest first.
    pub async fn transactions(&self, required: Option<u64>) -> Result<Vec<LazyTx>> {
        self.sync_history(required).await?;
        let store = self.orch.store();
        let mut rows = store.script_funding_txs(self.id())?;
        rows.extend(store.script_spending_txs(self.id())?);
        let mut seen = FxHashSet::default();
        rows.retain(|row| seen.insert(row.id));
        // unconfirmed transactions are the newest
        rows.sort_by_key(|row: &TxRow| std::cmp::Reverse((row.height.unwrap_or(u64::MAX), row.id)));
        let mut txs = Vec::with_capacity(rows.len());
        for row in &rows {
            txs.push(LazyTx::new(self.orch.clone(), self.orch.graph().link_tx(row)?));
        }
        Ok(txs)
    }
}

impl fmt::Debug for LazyScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LazyScript").field(&self.script).finish()
    }
}
