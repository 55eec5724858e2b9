//! Esplora REST API: request paths, response bodies and clients.
//!
//! The graph only ever issues GET requests keyed by a path relative to the
//! API base. [`Request`] builds and parses those paths; the store uses the
//! parsed form to decide how a recorded body is ingested.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default public Esplora instance.
pub const DEFAULT_API_BASE: &str = "https://blockstream.info/api/";

/// Number of transactions Esplora returns per address history page.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// A GET request understood by the graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Request {
    /// `tx/:txid`
    Tx { txid: String },
    /// `tx/:txid/outspends`
    TxOutspends { txid: String },
    /// `address/:address/txs/chain[/:last_seen_txid]`
    AddressTxs {
        address: String,
        last_seen: Option<String>,
    },
    /// `blocks/tip/height`
    TipHeight,
}

impl Request {
    /// Relative request path.
    pub fn path(&self) -> String {
        self.to_string()
    }

    /// Parses a relative request path. Returns `None` for unknown shapes.
    pub fn parse(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        let request = match parts.as_slice() {
            ["tx", txid] => Request::Tx {
                txid: (*txid).to_string(),
            },
            ["tx", txid, "outspends"] => Request::TxOutspends {
                txid: (*txid).to_string(),
            },
            ["address", address, "txs", "chain"] => Request::AddressTxs {
                address: (*address).to_string(),
                last_seen: None,
            },
            ["address", address, "txs", "chain", txid] => Request::AddressTxs {
                address: (*address).to_string(),
                last_seen: Some((*txid).to_string()),
            },
            ["blocks", "tip", "height"] => Request::TipHeight,
            _ => return None,
        };
        let empty = match &request {
            Request::Tx { txid } | Request::TxOutspends { txid } => txid.is_empty(),
            Request::AddressTxs { address, last_seen } => {
                address.is_empty() || last_seen.as_deref() == Some("")
            }
            Request::TipHeight => false,
        };
        (!empty).then_some(request)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Tx { txid } => write!(f, "tx/{txid}"),
            Request::TxOutspends { txid } => write!(f, "tx/{txid}/outspends"),
            Request::AddressTxs {
                address,
                last_seen: None,
            } => write!(f, "address/{address}/txs/chain"),
            Request::AddressTxs {
                address,
                last_seen: Some(txid),
            } => write!(f, "address/{address}/txs/chain/{txid}"),
            Request::TipHeight => f.write_str("blocks/tip/height"),
        }
    }
}

/// A remote request that did not produce a usable body.
#[derive(Clone, Debug, Error)]
#[error("GET {path} failed ({}): {body}", status_label(.status))]
pub struct FetchError {
    /// Relative request path.
    pub path: String,
    /// HTTP status, `None` when no response was received.
    pub status: Option<u16>,
    /// Response body (or transport error message) kept for diagnostics.
    pub body: String,
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "transport".to_string(), |code| code.to_string())
}

/// Source of raw Esplora response bodies.
#[async_trait(?Send)]
pub trait RemoteClient {
    /// Fetches `path` relative to the API base.
    async fn get(&self, path: &str) -> Result<String, FetchError>;
}

/// [`RemoteClient`] talking to an Esplora server over HTTP.
pub struct HttpClient {
    base: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// Creates a client for `base`, e.g. [`DEFAULT_API_BASE`].
    pub fn new(base: impl Into<String>) -> Result<Self, FetchError> {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("txgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FetchError {
                path: String::new(),
                status: None,
                body: err.to_string(),
            })?;
        Ok(Self { base, http })
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

#[async_trait(?Send)]
impl RemoteClient for HttpClient {
    async fn get(&self, path: &str) -> Result<String, FetchError> {
        let url = format!("{}{}", self.base, path);
        debug!(%url, "GET");
        let transport = |err: reqwest::Error| FetchError {
            path: path.to_string(),
            status: None,
            body: err.to_string(),
        };
        let response = self.http.get(&url).send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(FetchError {
                path: path.to_string(),
                status: Some(status.as_u16()),
                body,
            });
        }
        Ok(body)
    }
}

/// [`RemoteClient`] replaying canned bodies.
///
/// Each path has a queue of responses; the last one repeats. Every request
/// is recorded, and each request yields to the scheduler once so that
/// concurrent callers interleave as they would against a real server.
#[derive(Default)]
pub struct StaticClient {
    responses: RefCell<FxHashMap<String, VecDeque<Result<String, FetchError>>>>,
    requests: RefCell<Vec<String>>,
}

impl StaticClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful body for `path`.
    pub fn respond(&self, path: impl Into<String>, body: impl Into<String>) -> &Self {
        self.push(path.into(), Ok(body.into()))
    }

    /// Queues a non-success status for `path`.
    pub fn fail(&self, path: impl Into<String>, status: u16, body: impl Into<String>) -> &Self {
        let path = path.into();
        let err = FetchError {
            path: path.clone(),
            status: Some(status),
            body: body.into(),
        };
        self.push(path, Err(err))
    }

    fn push(&self, path: String, response: Result<String, FetchError>) -> &Self {
        self.responses
            .borrow_mut()
            .entry(path)
            .or_default()
            .push_back(response);
        self
    }

    /// Every path requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    /// Number of times `path` was requested.
    pub fn request_count(&self, path: &str) -> usize {
        self.requests.borrow().iter().filter(|p| *p == path).count()
    }
}

#[async_trait(?Send)]
impl RemoteClient for StaticClient {
    async fn get(&self, path: &str) -> Result<String, FetchError> {
        self.requests.borrow_mut().push(path.to_string());
        tokio::task::yield_now().await;
        let mut responses = self.responses.borrow_mut();
        let queue = responses.get_mut(path).ok_or_else(|| FetchError {
            path: path.to_string(),
            status: Some(404),
            body: "no canned response".to_string(),
        })?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.unwrap_or_else(|| {
            Err(FetchError {
                path: path.to_string(),
                status: Some(404),
                body: "no canned response".to_string(),
            })
        })
    }
}

/// `tx/:txid` body, and each element of an address history page.
#[derive(Clone, Debug, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub vin: Vec<EsploraVin>,
    pub vout: Vec<EsploraVout>,
    pub status: EsploraStatus,
}

/// A transaction input.
#[derive(Clone, Debug, Deserialize)]
pub struct EsploraVin {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub prevout: Option<EsploraVout>,
    #[serde(default)]
    pub is_coinbase: bool,
}

/// A transaction output.
#[derive(Clone, Debug, Deserialize)]
pub struct EsploraVout {
    pub scriptpubkey: String,
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

/// Confirmation status of a transaction.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EsploraStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

/// Each element of a `tx/:txid/outspends` body, indexed by vout.
#[derive(Clone, Debug, Deserialize)]
pub struct EsploraOutspend {
    pub spent: bool,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vin: Option<u32>,
    #[serde(default)]
    pub status: Option<EsploraStatus>,
}
