//! Lazy, asynchronous population of the entity graph.
//!
//! Reading a field that is not known yet schedules one background load for
//! it and hands back the field's cell. Loads read the store first and fall
//! back to downloading from the remote API; every download goes through a
//! single deduplicating accessor.
//!
//! Everything here is single-threaded: the orchestrator must be driven from
//! inside a [`tokio::task::LocalSet`].

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::esplora::{RemoteClient, Request};
use crate::graph::Graph;
use crate::model::{FieldSpec, Output, OutputField, Script, ScriptField, Transaction, TxField};
use crate::store::Store;
use crate::types::{EntityRef, OutputId, ResponseId, ScriptId, TxId};

mod handles;
mod load;
mod pagination;

pub use handles::{LazyOutput, LazyScript, LazyTx};
pub use pagination::FetchState;

/// Memoization key of a download: the request path plus the history fetch
/// cycle it belongs to (the height the cycle was started for).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RequestKey {
    path: String,
    cycle: Option<u64>,
}

type SharedFetch = Rc<OnceCell<Result<ResponseId>>>;
type LoadKey = (EntityRef, &'static str);

/// A field whose load can be scheduled.
#[derive(Clone)]
enum Target {
    Tx(Rc<Transaction>, TxField),
    Output(Rc<Output>, OutputField),
    Script(Rc<Script>, ScriptField),
}

impl Target {
    fn spec(&self) -> &'static FieldSpec {
        match self {
            Target::Tx(_, field) => field.spec(),
            Target::Output(_, field) => field.spec(),
            Target::Script(_, field) => field.spec(),
        }
    }

    fn entity(&self) -> EntityRef {
        match self {
            Target::Tx(tx, _) => EntityRef::Tx(tx.id()),
            Target::Output(output, _) => EntityRef::Output(output.id()),
            Target::Script(script, _) => EntityRef::Script(script.id()),
        }
    }

    fn key(&self) -> LoadKey {
        (self.entity(), self.spec().name)
    }

    fn is_resolved(&self) -> bool {
        match self {
            Target::Tx(tx, field) => tx.is_resolved(*field),
            Target::Output(output, field) => output.is_resolved(*field),
            Target::Script(script, field) => script.has_value(*field),
        }
    }

    /// Pagination markers hold a value as soon as the script row is read,
    /// but are only settled once the history is contiguous.
    fn needs_load(&self) -> bool {
        match self {
            Target::Script(script, field) if *field != ScriptField::Address => {
                !script.has_value(*field)
                    || !matches!(
                        FetchState::classify(script, None),
                        FetchState::Contiguous { .. }
                    )
            }
            _ => !self.is_resolved(),
        }
    }

    fn fail(&self, err: GraphError) {
        match self {
            Target::Tx(tx, field) => tx.fail(*field, err),
            Target::Output(output, field) => output.fail(*field, err),
            Target::Script(script, field) => script.fail(*field, err),
        }
    }

    fn begin_refresh(&self) {
        if let Target::Script(script, field) = self {
            script.begin_refresh(*field);
        }
    }

    fn settle(&self) {
        if let Target::Script(script, field) = self {
            script.settle(*field);
        }
    }

    fn clear_failure(&self) {
        match self {
            Target::Tx(tx, field) => tx.clear_failure(*field),
            Target::Output(output, field) => output.clear_failure(*field),
            Target::Script(script, field) => script.clear_failure(*field),
        }
    }
}

struct Inner {
    graph: Graph,
    store: Box<dyn Store>,
    client: Rc<dyn RemoteClient>,
    requests: RefCell<FxHashMap<RequestKey, SharedFetch>>,
    tasks: RefCell<FxHashMap<LoadKey, AbortHandle>>,
}

/// Owns the graph, the store and the remote client, and schedules loads.
///
/// Cheap to clone: clones share the same graph.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Rc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator with an empty graph.
    pub fn new(store: Box<dyn Store>, client: Rc<dyn RemoteClient>) -> Self {
        Self {
            inner: Rc::new(Inner {
                graph: Graph::new(),
                store,
                client,
                requests: RefCell::new(FxHashMap::default()),
                tasks: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// The canonical entity graph.
    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    /// The backing store.
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    /// Handle to the transaction with store identity `id`.
    pub fn tx(&self, id: TxId) -> LazyTx {
        LazyTx::new(self.clone(), self.inner.graph.tx(id))
    }

    /// Handle to the output with store identity `id`.
    pub fn output(&self, id: OutputId) -> LazyOutput {
        LazyOutput::new(self.clone(), self.inner.graph.output(id))
    }

    /// Handle to the script with store identity `id`.
    pub fn script(&self, id: ScriptId) -> LazyScript {
        LazyScript::new(self.clone(), self.inner.graph.script(id))
    }

    /// Number of background loads currently running.
    pub fn outstanding_loads(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Cancels every background load still running. Fields they were
    /// populating stay unset; reading them again schedules new loads.
    pub fn abort_loads(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        for (_, handle) in tasks {
            handle.abort();
        }
    }

    /// Looks a transaction up by hash, downloading it if the store has never
    /// seen it.
    pub async fn load_tx_by_txid(&self, txid: &str) -> Result<LazyTx> {
        validate_txid(txid)?;
        let row = match self.inner.store.tx_by_txid(txid)? {
            Some(row) => row,
            None => {
                self.download(&Request::Tx { txid: txid.to_string() }, None)
                    .await?;
                self.inner
                    .store
                    .tx_by_txid(txid)?
                    .ok_or_else(|| GraphError::not_found("tx", txid))?
            }
        };
        let tx = self.inner.graph.link_tx(&row)?;
        Ok(LazyTx::new(self.clone(), tx))
    }

    /// Looks a script up by address, fetching the first page of its history
    /// if the store has never seen it.
    pub async fn load_script_by_address(&self, address: &str) -> Result<LazyScript> {
        if address.is_empty() || address.contains('/') {
            return Err(GraphError::InvalidArgument(format!(
                "not an address: {address:?}"
            )));
        }
        let row = match self.inner.store.script_by_address(address)? {
            Some(row) => row,
            None => {
                self.fetch_first_page(address, None).await?;
                self.inner
                    .store
                    .script_by_address(address)?
                    .ok_or_else(|| GraphError::not_found("script", address))?
            }
        };
        let script = self.inner.graph.link_script(&row)?;
        Ok(LazyScript::new(self.clone(), script))
    }

    /// Finishes every multi-page history fetch the store records as
    /// unfinished, for instance after the process was interrupted.
    pub async fn resume_interrupted(&self) -> Result<Vec<LazyScript>> {
        let mut resumed = Vec::new();
        for fetch in self.inner.store.interrupted_fetches()? {
            info!(address = %fetch.address, oldest = %fetch.oldest_txid, "resuming history fetch");
            let script = self.load_script_by_address(&fetch.address).await?;
            script.sync_history(None).await?;
            resumed.push(script);
        }
        Ok(resumed)
    }

    /// Downloads `request` once per fetch cycle and records the response.
    ///
    /// Concurrent and later callers with the same key share the first
    /// caller's result. A failed download is handed to everyone waiting on
    /// it and then forgotten, so a later request tries again.
    pub(crate) async fn download(&self, request: &Request, cycle: Option<u64>) -> Result<ResponseId> {
        let key = RequestKey {
            path: request.path(),
            cycle,
        };
        let shared = Rc::clone(
            self.inner
                .requests
                .borrow_mut()
                .entry(key.clone())
                .or_default(),
        );
        let result = shared
            .get_or_init(|| self.send_request(&key.path))
            .await
            .clone();
        if result.is_err() {
            let mut requests = self.inner.requests.borrow_mut();
            if requests
                .get(&key)
                .is_some_and(|current| Rc::ptr_eq(current, &shared))
            {
                requests.remove(&key);
            }
        }
        result
    }

    async fn send_request(&self, path: &str) -> Result<ResponseId> {
        debug!(path, "downloading");
        let body = self.inner.client.get(path).await?;
        Ok(self.inner.store.insert_response(path, &body)?)
    }

    /// Schedules a background load of `target` unless it is settled or a
    /// load for it is already running.
    fn schedule(&self, target: Target) {
        if !target.needs_load() {
            return;
        }
        let key = target.key();
        if self.inner.tasks.borrow().contains_key(&key) {
            return;
        }
        target.clear_failure();
        target.begin_refresh();
        debug!(entity = %key.0, field = key.1, "scheduling load");
        let this = self.clone();
        let task = target.clone();
        let handle = tokio::task::spawn_local(async move {
            let result = this.run_load(&task).await;
            this.finish(&task, result);
        });
        self.inner
            .tasks
            .borrow_mut()
            .insert(key, handle.abort_handle());
    }

    fn finish(&self, target: &Target, result: Result<()>) {
        let (entity, field) = target.key();
        self.inner.tasks.borrow_mut().remove(&(entity, field));
        if let Err(err) = result {
            warn!(%entity, field, error = %err, "load failed");
            target.fail(err);
            return;
        }
        target.settle();
        if !target.is_resolved() && !target.spec().may_stay_open {
            warn!(%entity, field, "load finished without a value");
            target.fail(GraphError::Unresolved { entity, field });
        }
    }
}

fn validate_txid(txid: &str) -> Result<()> {
    match hex::decode(txid) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(GraphError::InvalidArgument(format!(
            "not a transaction hash: {txid:?}"
        ))),
    }
}
