//! Turns recorded Esplora responses into relational rows.
//!
//! Every function runs inside the caller's SQL transaction, so a body that
//! fails to decode leaves no trace.

use rusqlite::{params, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StoreError;
use crate::esplora::{EsploraOutspend, EsploraTx, EsploraVout, Request};

use super::StoreResult;

pub(super) fn ingest(
    tx: &Transaction<'_>,
    request: &Request,
    path: &str,
    body: &str,
    page_size: usize,
) -> StoreResult<()> {
    match request {
        Request::Tx { .. } => {
            let esplora_tx: EsploraTx = decode(path, body)?;
            record_tx(tx, &esplora_tx)?;
        }
        Request::TxOutspends { txid } => {
            let outspends: Vec<EsploraOutspend> = decode(path, body)?;
            record_outspends(tx, txid, &outspends)?;
        }
        Request::AddressTxs { address, last_seen } => {
            let page: Vec<EsploraTx> = decode(path, body)?;
            let mut ids = Vec::with_capacity(page.len());
            for esplora_tx in &page {
                ids.push(record_tx(tx, esplora_tx)?);
            }
            record_history_page(tx, address, last_seen.is_some(), &ids, page_size)?;
        }
        Request::TipHeight => {
            let height: u64 = decode(path, body)?;
            tx.execute(
                "INSERT INTO chain_tip (id, height) VALUES (1, ?1)
                 ON CONFLICT (id) DO UPDATE SET height = MAX(height, excluded.height)",
                [height as i64],
            )?;
        }
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(|source| StoreError::Decode {
        path: path.to_string(),
        source,
    })
}

fn ensure_tx(tx: &Transaction<'_>, txid: &str) -> StoreResult<i64> {
    tx.execute("INSERT OR IGNORE INTO tx (txid) VALUES (?1)", [txid])?;
    Ok(tx.query_row("SELECT id FROM tx WHERE txid = ?1", [txid], |row| row.get(0))?)
}

/// Finds the script by scriptpubkey, adopting a row previously created from
/// its address alone.
fn ensure_script(tx: &Transaction<'_>, vout: &EsploraVout) -> StoreResult<i64> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM script WHERE scriptpubkey = ?1",
            [&vout.scriptpubkey],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        if let Some(address) = &vout.scriptpubkey_address {
            tx.execute(
                "UPDATE script SET address = ?2 WHERE id = ?1 AND address IS NULL",
                params![id, address],
            )?;
        }
        return Ok(id);
    }
    if let Some(address) = &vout.scriptpubkey_address {
        let by_address: Option<i64> = tx
            .query_row("SELECT id FROM script WHERE address = ?1", [address], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(id) = by_address {
            tx.execute(
                "UPDATE script SET scriptpubkey = ?2 WHERE id = ?1",
                params![id, vout.scriptpubkey],
            )?;
            return Ok(id);
        }
    }
    tx.execute(
        "INSERT INTO script (scriptpubkey, address) VALUES (?1, ?2)",
        params![vout.scriptpubkey, vout.scriptpubkey_address],
    )?;
    Ok(tx.last_insert_rowid())
}

fn ensure_script_address(tx: &Transaction<'_>, address: &str) -> StoreResult<i64> {
    tx.execute("INSERT OR IGNORE INTO script (address) VALUES (?1)", [address])?;
    Ok(tx.query_row("SELECT id FROM script WHERE address = ?1", [address], |row| {
        row.get(0)
    })?)
}

fn ensure_output(
    tx: &Transaction<'_>,
    funding_tx_id: i64,
    vout: u32,
    data: Option<&EsploraVout>,
) -> StoreResult<i64> {
    let script_id = data.map(|vout| ensure_script(tx, vout)).transpose()?;
    tx.execute(
        "INSERT INTO output (funding_tx_id, vout, script_id, sats) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (funding_tx_id, vout) DO UPDATE SET
             script_id = COALESCE(excluded.script_id, script_id),
             sats = COALESCE(excluded.sats, sats)",
        params![
            funding_tx_id,
            vout,
            script_id,
            data.map(|vout| vout.value as i64)
        ],
    )?;
    Ok(tx.query_row(
        "SELECT id FROM output WHERE funding_tx_id = ?1 AND vout = ?2",
        params![funding_tx_id, vout],
        |row| row.get(0),
    )?)
}

fn record_input(tx: &Transaction<'_>, output_id: i64, spending_tx_id: i64, vin: u32) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO input (output_id, spending_tx_id, vin) VALUES (?1, ?2, ?3)
         ON CONFLICT (output_id) DO NOTHING",
        params![output_id, spending_tx_id, vin],
    )?;
    Ok(())
}

fn record_tx(tx: &Transaction<'_>, esplora_tx: &EsploraTx) -> StoreResult<i64> {
    let id = ensure_tx(tx, &esplora_tx.txid)?;
    let spends: Vec<_> = esplora_tx.vin.iter().filter(|vin| !vin.is_coinbase).collect();
    tx.execute(
        "UPDATE tx SET height = COALESCE(?2, height), input_count = ?3, output_count = ?4
         WHERE id = ?1",
        params![
            id,
            esplora_tx.status.block_height.map(|h| h as i64),
            spends.len() as i64,
            esplora_tx.vout.len() as i64
        ],
    )?;
    for (vout, data) in esplora_tx.vout.iter().enumerate() {
        ensure_output(tx, id, vout as u32, Some(data))?;
    }
    for (vin, spend) in spends.into_iter().enumerate() {
        let funding_tx_id = ensure_tx(tx, &spend.txid)?;
        let output_id = ensure_output(tx, funding_tx_id, spend.vout, spend.prevout.as_ref())?;
        record_input(tx, output_id, id, vin as u32)?;
    }
    debug!(txid = %esplora_tx.txid, id, "ingested tx");
    Ok(id)
}

fn record_outspends(tx: &Transaction<'_>, txid: &str, outspends: &[EsploraOutspend]) -> StoreResult<()> {
    let funding_tx_id = ensure_tx(tx, txid)?;
    let funding_height: Option<i64> =
        tx.query_row("SELECT height FROM tx WHERE id = ?1", [funding_tx_id], |row| row.get(0))?;
    let tip: Option<i64> = tx
        .query_row("SELECT height FROM chain_tip WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    for (vout, outspend) in outspends.iter().enumerate() {
        let output_id = ensure_output(tx, funding_tx_id, vout as u32, None)?;
        match (&outspend.txid, outspend.vin) {
            (Some(spender), Some(vin)) if outspend.spent => {
                let spending_tx_id = ensure_tx(tx, spender)?;
                if let Some(height) = outspend.status.as_ref().and_then(|s| s.block_height) {
                    tx.execute(
                        "UPDATE tx SET height = ?2 WHERE id = ?1",
                        params![spending_tx_id, height as i64],
                    )?;
                }
                record_input(tx, output_id, spending_tx_id, vin)?;
            }
            _ => {
                if let Some(height) = tip.or(funding_height) {
                    tx.execute(
                        "UPDATE output SET unspent_height = MAX(COALESCE(unspent_height, 0), ?2)
                         WHERE id = ?1",
                        params![output_id, height],
                    )?;
                }
            }
        }
    }
    debug!(txid, outputs = outspends.len(), "ingested outspends");
    Ok(())
}

/// Updates the pagination bookkeeping of `address` after one history page.
///
/// Pages list transactions newest first. The first page of a cycle records
/// the chain tip as the read height. The last page (short, or reaching the
/// previous bound) moves the bound to the cycle's newest transaction and
/// clears the in-progress markers.
fn record_history_page(
    tx: &Transaction<'_>,
    address: &str,
    continuation: bool,
    page: &[i64],
    page_size: usize,
) -> StoreResult<()> {
    let script_id = ensure_script_address(tx, address)?;
    let (bound, newest, read_height): (Option<i64>, Option<i64>, Option<i64>) = tx.query_row(
        "SELECT contiguous_bound_tx_id, fetch_newest_tx_id, fetch_newest_tx_read_height
         FROM script WHERE id = ?1",
        [script_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let (newest, read_height) = if continuation {
        (newest, read_height)
    } else {
        let tip: Option<i64> = tx
            .query_row("SELECT height FROM chain_tip WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        let mut page_height: Option<i64> = None;
        for id in page {
            let height: Option<i64> =
                tx.query_row("SELECT height FROM tx WHERE id = ?1", [id], |row| row.get(0))?;
            page_height = page_height.max(height);
        }
        let read_height = tip.or(page_height).or(read_height).unwrap_or(0);
        (page.first().copied(), Some(read_height))
    };

    let reached_bound = bound.is_some_and(|bound| page.contains(&bound));
    if page.len() < page_size || reached_bound {
        tx.execute(
            "UPDATE script SET contiguous_bound_tx_id = ?2, fetch_newest_tx_id = NULL,
                 fetch_newest_tx_read_height = ?3, fetch_oldest_tx_id = NULL
             WHERE id = ?1",
            params![script_id, newest.or(bound), read_height],
        )?;
        debug!(address, "history complete");
    } else {
        tx.execute(
            "UPDATE script SET fetch_newest_tx_id = ?2, fetch_newest_tx_read_height = ?3,
                 fetch_oldest_tx_id = ?4
             WHERE id = ?1",
            params![script_id, newest, read_height, page.last().copied()],
        )?;
        debug!(address, rows = page.len(), "history page");
    }
    Ok(())
}
