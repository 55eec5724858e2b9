//! Per-kind load policies run by background load tasks.

use std::rc::Rc;

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::esplora::Request;
use crate::model::{Io, LoadPolicy, Output, OutputField, Script, ScriptField, Transaction, TxField};
use crate::types::{OutputId, ScriptId, TxId};

use super::{FetchState, Orchestrator, Target};

impl Orchestrator {
    pub(super) async fn run_load(&self, target: &Target) -> Result<()> {
        match target {
            Target::Tx(tx, field) => match field.spec().load {
                LoadPolicy::TxOutputs => self.load_tx_children(tx, Io::Outputs).await,
                LoadPolicy::TxInputs => self.load_tx_children(tx, Io::Inputs).await,
                _ => self.load_tx_row(tx, *field).await,
            },
            Target::Output(output, field) => self.load_output_row(output, *field).await,
            Target::Script(script, field) => self.load_script_field(script, *field).await,
        }
    }

    pub(super) fn reload_tx(&self, id: TxId) -> Result<Option<Rc<Transaction>>> {
        match self.inner.store.tx(id)? {
            Some(row) => Ok(Some(self.inner.graph.link_tx(&row)?)),
            None => Ok(None),
        }
    }

    pub(super) fn reload_output(&self, id: OutputId) -> Result<Option<Rc<Output>>> {
        match self.inner.store.output(id)? {
            Some(row) => Ok(Some(self.inner.graph.link_output(&row)?)),
            None => Ok(None),
        }
    }

    pub(super) fn reload_script(&self, id: ScriptId) -> Result<Option<Rc<Script>>> {
        match self.inner.store.script(id)? {
            Some(row) => Ok(Some(self.inner.graph.link_script(&row)?)),
            None => Ok(None),
        }
    }

    /// Hash, height and counts: the store, then the transaction download.
    async fn load_tx_row(&self, tx: &Rc<Transaction>, field: TxField) -> Result<()> {
        self.reload_tx(tx.id())?;
        if tx.is_resolved(field) {
            return Ok(());
        }
        let txid = tx
            .txid()
            .read_value()
            .ok_or_else(|| GraphError::not_found("tx", tx.id()))?;
        self.download(&Request::Tx { txid }, None).await?;
        self.reload_tx(tx.id())?;
        Ok(())
    }

    /// Inputs or outputs: wait for the count, then split the stored rows into
    /// the final tuple or the partial set.
    async fn load_tx_children(&self, tx: &Rc<Transaction>, io: Io) -> Result<()> {
        let lazy = self.tx(tx.id());
        let count = match io {
            Io::Inputs => lazy.input_count().await?,
            Io::Outputs => lazy.output_count().await?,
        };
        let rows = match io {
            Io::Inputs => self.inner.store.tx_inputs(tx.id())?,
            Io::Outputs => self.inner.store.tx_outputs(tx.id())?,
        };
        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            members.push(self.inner.graph.link_output(row)?.id());
        }
        debug!(tx = %tx.id(), ?io, count, found = members.len(), "loaded children");
        if members.len() == count as usize {
            self.inner.graph.set_collection(tx, io, &members)
        } else {
            self.inner.graph.add_members(tx, io, &members)
        }
    }

    /// Data fields come from the store once the funding transaction is
    /// downloaded; spend status falls back to the spend report.
    pub(super) async fn load_output_row(&self, output: &Rc<Output>, field: OutputField) -> Result<()> {
        self.reload_output(output.id())?;
        if output.is_resolved(field) {
            return Ok(());
        }
        let funding_id = output
            .funding_tx_id()
            .read_value()
            .ok_or_else(|| GraphError::not_found("output", output.id()))?;
        let funding = self.tx(funding_id);
        funding.output_count().await?;
        self.reload_output(output.id())?;
        if output.is_resolved(field) || field.spec().load != LoadPolicy::SpendStatus {
            return Ok(());
        }
        let txid = funding.txid().await?;
        self.download(&Request::TxOutspends { txid }, None).await?;
        self.reload_output(output.id())?;
        Ok(())
    }

    /// The address comes from the store alone; pagination markers settle by
    /// syncing the address history.
    async fn load_script_field(&self, script: &Rc<Script>, field: ScriptField) -> Result<()> {
        if self.reload_script(script.id())?.is_none() {
            return Err(GraphError::not_found("script", script.id()));
        }
        if field.spec().load != LoadPolicy::ScriptHistory
            || matches!(
                FetchState::classify(script, None),
                FetchState::Contiguous { .. }
            )
        {
            return Ok(());
        }
        let address = self.script_address(script)?;
        self.sync_script(script, &address, None).await?;
        Ok(())
    }

    /// Address of `script`, read from the store if the graph lacks it. Only
    /// scripts with an address have a history to fetch.
    pub(super) fn script_address(&self, script: &Rc<Script>) -> Result<String> {
        if let Some(address) = script.address().read_value() {
            return Ok(address);
        }
        if self.reload_script(script.id())?.is_none() {
            return Err(GraphError::not_found("script", script.id()));
        }
        script.address().read_value().ok_or(GraphError::Unresolved {
            entity: script.entity(),
            field: ScriptField::Address.spec().name,
        })
    }
}
