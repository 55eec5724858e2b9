//! Multi-page download of a script's transaction history.
//!
//! The store owns the bookkeeping: each recorded page updates the script's
//! markers, which are then re-read into the graph. This module only decides
//! which page to request next.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::esplora::Request;
use crate::model::Script;

use super::Orchestrator;

/// Freshness of a script's known history.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FetchState {
    /// Nothing has been downloaded.
    NoFetch,
    /// A multi-page fetch is underway.
    InProgress,
    /// History is complete as of `read_height`.
    Contiguous { read_height: u64 },
    /// History was complete as of `read_height`, which is below the height
    /// the caller requires.
    Stale { read_height: u64 },
}

impl FetchState {
    /// Classifies `script` for a caller requiring freshness as of `required`.
    pub fn classify(script: &Script, required: Option<u64>) -> Self {
        if script.fetch_oldest_tx().read_value().flatten().is_some() {
            return FetchState::InProgress;
        }
        match script.fetch_newest_tx_read_height().read_value().flatten() {
            Some(read_height) if required.is_some_and(|required| required > read_height) => {
                FetchState::Stale { read_height }
            }
            Some(read_height) => FetchState::Contiguous { read_height },
            None => FetchState::NoFetch,
        }
    }
}

impl Orchestrator {
    /// Brings the history of `script` up to date as of `required`.
    ///
    /// An interrupted fetch is continued first. A stale or missing history
    /// starts a new cycle at most once per call; if the source itself is
    /// behind `required`, the resulting stale state is returned as is.
    pub(super) async fn sync_script(
        &self,
        script: &Rc<Script>,
        address: &str,
        required: Option<u64>,
    ) -> Result<FetchState> {
        self.reload_script(script.id())?;
        let mut started = false;
        loop {
            let state = FetchState::classify(script, required);
            match state {
                FetchState::Contiguous { .. } => return Ok(state),
                FetchState::InProgress => self.fetch_next_page(script, address, required).await?,
                FetchState::Stale { read_height } if started => {
                    warn!(address, read_height, ?required, "history still stale after refresh");
                    return Ok(state);
                }
                FetchState::NoFetch if started => {
                    return Err(GraphError::Stalled {
                        address: address.to_string(),
                    })
                }
                FetchState::NoFetch | FetchState::Stale { .. } => {
                    started = true;
                    self.fetch_first_page(address, required).await?;
                    self.reload_script(script.id())?;
                }
            }
        }
    }

    /// Starts a fetch cycle: the chain tip, then the newest history page.
    pub(super) async fn fetch_first_page(&self, address: &str, cycle: Option<u64>) -> Result<()> {
        debug!(address, ?cycle, "starting history fetch");
        self.download(&Request::TipHeight, cycle).await?;
        self.download(
            &Request::AddressTxs {
                address: address.to_string(),
                last_seen: None,
            },
            cycle,
        )
        .await?;
        Ok(())
    }

    /// Requests the page after the oldest transaction fetched so far. A page
    /// that does not move the oldest marker means the fetch cannot progress.
    async fn fetch_next_page(
        &self,
        script: &Rc<Script>,
        address: &str,
        cycle: Option<u64>,
    ) -> Result<()> {
        let stalled = || GraphError::Stalled {
            address: address.to_string(),
        };
        let oldest = script
            .fetch_oldest_tx()
            .read_value()
            .flatten()
            .ok_or_else(stalled)?;
        let last_seen = self.tx(oldest).txid().await?;
        debug!(address, %last_seen, "fetching next history page");
        self.download(
            &Request::AddressTxs {
                address: address.to_string(),
                last_seen: Some(last_seen),
            },
            cycle,
        )
        .await?;
        self.reload_script(script.id())?;
        if script.fetch_oldest_tx().read_value().flatten() == Some(oldest) {
            return Err(stalled());
        }
        Ok(())
    }
}
