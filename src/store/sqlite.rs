use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::esplora::Request;
use crate::model::{OutputRow, Pagination, ScriptRow, TxRow};
use crate::types::{OutputId, ResponseId, ScriptId, TxId};

use super::ingest;
use super::{InterruptedFetch, Store, StoreOptions, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS esplora_response (
    id INTEGER PRIMARY KEY,
    request_path TEXT NOT NULL,
    response_body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chain_tip (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    height INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS tx (
    id INTEGER PRIMARY KEY,
    txid TEXT NOT NULL UNIQUE,
    height INTEGER,
    input_count INTEGER,
    output_count INTEGER
);
CREATE TABLE IF NOT EXISTS script (
    id INTEGER PRIMARY KEY,
    scriptpubkey TEXT UNIQUE,
    address TEXT UNIQUE,
    contiguous_bound_tx_id INTEGER REFERENCES tx (id),
    fetch_newest_tx_id INTEGER REFERENCES tx (id),
    fetch_newest_tx_read_height INTEGER,
    fetch_oldest_tx_id INTEGER REFERENCES tx (id)
);
CREATE TABLE IF NOT EXISTS output (
    id INTEGER PRIMARY KEY,
    funding_tx_id INTEGER NOT NULL REFERENCES tx (id),
    vout INTEGER NOT NULL,
    script_id INTEGER REFERENCES script (id),
    sats INTEGER,
    unspent_height INTEGER,
    UNIQUE (funding_tx_id, vout)
);
CREATE TABLE IF NOT EXISTS input (
    id INTEGER PRIMARY KEY,
    output_id INTEGER NOT NULL UNIQUE REFERENCES output (id),
    spending_tx_id INTEGER NOT NULL REFERENCES tx (id),
    vin INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_output_script ON output (script_id);
CREATE INDEX IF NOT EXISTS idx_input_spending_tx ON input (spending_tx_id);
";

const TX_COLUMNS: &str = "tx.id, tx.txid, tx.height, tx.input_count, tx.output_count";

// A spent output reports its spender's height, otherwise the height it was
// last observed unspent at.
const OUTPUT_SELECT: &str = "
SELECT output.id, output.funding_tx_id, output.vout, output.script_id, output.sats,
       input.id, input.spending_tx_id, input.vin,
       CASE WHEN input.id IS NOT NULL THEN spender.height ELSE output.unspent_height END
FROM output
LEFT JOIN input ON input.output_id = output.id
LEFT JOIN tx AS spender ON spender.id = input.spending_tx_id";

const SCRIPT_COLUMNS: &str = "id, address, contiguous_bound_tx_id, fetch_newest_tx_id, \
     fetch_newest_tx_read_height, fetch_oldest_tx_id";

/// [`Store`] backed by a SQLite database.
pub struct SqliteStore {
    conn: Connection,
    options: StoreOptions,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, options)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(options: StoreOptions) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, options)
    }

    fn init(conn: Connection, options: StoreOptions) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, options })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Number of responses recorded for `path`.
    pub fn response_count(&self, path: &str) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM esplora_response WHERE request_path = ?1",
            [path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn output_rows(&self, filter: &str, key: i64) -> StoreResult<Vec<OutputRow>> {
        let mut stmt = self.conn.prepare(&format!("{OUTPUT_SELECT} {filter}"))?;
        let rows = stmt.query_map([key], output_row)?;
        let mut outputs = Vec::new();
        for row in rows {
            outputs.push(row?);
        }
        Ok(outputs)
    }

    fn tx_rows(&self, sql: &str, key: i64) -> StoreResult<Vec<TxRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([key], tx_row)?;
        let mut txs = Vec::new();
        for row in rows {
            txs.push(row?);
        }
        Ok(txs)
    }
}

impl Store for SqliteStore {
    fn tx(&self, id: TxId) -> StoreResult<Option<TxRow>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM tx WHERE tx.id = ?1");
        Ok(self.conn.query_row(&sql, [id.0], tx_row).optional()?)
    }

    fn tx_by_txid(&self, txid: &str) -> StoreResult<Option<TxRow>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM tx WHERE tx.txid = ?1");
        Ok(self.conn.query_row(&sql, [txid], tx_row).optional()?)
    }

    fn tx_outputs(&self, id: TxId) -> StoreResult<Vec<OutputRow>> {
        self.output_rows("WHERE output.funding_tx_id = ?1 ORDER BY output.vout", id.0)
    }

    fn tx_inputs(&self, id: TxId) -> StoreResult<Vec<OutputRow>> {
        self.output_rows("WHERE input.spending_tx_id = ?1 ORDER BY input.vin", id.0)
    }

    fn output(&self, id: OutputId) -> StoreResult<Option<OutputRow>> {
        Ok(self.output_rows("WHERE output.id = ?1", id.0)?.into_iter().next())
    }

    fn script(&self, id: ScriptId) -> StoreResult<Option<ScriptRow>> {
        let sql = format!("SELECT {SCRIPT_COLUMNS} FROM script WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id.0], script_row).optional()?)
    }

    fn script_by_address(&self, address: &str) -> StoreResult<Option<ScriptRow>> {
        let sql = format!("SELECT {SCRIPT_COLUMNS} FROM script WHERE address = ?1");
        Ok(self.conn.query_row(&sql, [address], script_row).optional()?)
    }

    fn script_funding_txs(&self, id: ScriptId) -> StoreResult<Vec<TxRow>> {
        let sql = format!(
            "SELECT DISTINCT {TX_COLUMNS} FROM output
             JOIN tx ON tx.id = output.funding_tx_id
             WHERE output.script_id = ?1
             ORDER BY tx.height DESC, tx.id DESC"
        );
        self.tx_rows(&sql, id.0)
    }

    fn script_spending_txs(&self, id: ScriptId) -> StoreResult<Vec<TxRow>> {
        let sql = format!(
            "SELECT DISTINCT {TX_COLUMNS} FROM output
             JOIN input ON input.output_id = output.id
             JOIN tx ON tx.id = input.spending_tx_id
             WHERE output.script_id = ?1
             ORDER BY tx.height DESC, tx.id DESC"
        );
        self.tx_rows(&sql, id.0)
    }

    fn interrupted_fetches(&self) -> StoreResult<Vec<InterruptedFetch>> {
        let mut stmt = self.conn.prepare(
            "SELECT script.address, tx.txid FROM script
             JOIN tx ON tx.id = script.fetch_oldest_tx_id
             WHERE script.address IS NOT NULL
             ORDER BY script.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(InterruptedFetch {
                address: row.get(0)?,
                oldest_txid: row.get(1)?,
            })
        })?;
        let mut fetches = Vec::new();
        for row in rows {
            fetches.push(row?);
        }
        Ok(fetches)
    }

    fn chain_tip(&self) -> StoreResult<Option<u64>> {
        let height: Option<i64> = self
            .conn
            .query_row("SELECT height FROM chain_tip WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(height.map(|h| h as u64))
    }

    fn insert_response(&self, path: &str, body: &str) -> StoreResult<ResponseId> {
        let request = Request::parse(path).ok_or_else(|| StoreError::UnknownPath(path.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO esplora_response (request_path, response_body) VALUES (?1, ?2)",
            params![path, body],
        )?;
        let id = ResponseId(tx.last_insert_rowid());
        ingest::ingest(&tx, &request, path, body, self.options.page_size)?;
        tx.commit()?;
        debug!(path, response = id.0, "recorded response");
        Ok(id)
    }
}

fn opt_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v as u64))
}

fn opt_u32(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u32>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v as u32))
}

fn tx_row(row: &Row<'_>) -> rusqlite::Result<TxRow> {
    Ok(TxRow {
        id: TxId(row.get(0)?),
        txid: row.get(1)?,
        height: opt_u64(row, 2)?,
        input_count: opt_u32(row, 3)?,
        output_count: opt_u32(row, 4)?,
    })
}

fn output_row(row: &Row<'_>) -> rusqlite::Result<OutputRow> {
    Ok(OutputRow {
        id: OutputId(row.get(0)?),
        funding_tx_id: row.get::<_, Option<i64>>(1)?.map(TxId),
        vout: opt_u32(row, 2)?,
        script_id: row.get::<_, Option<i64>>(3)?.map(ScriptId),
        sats: opt_u64(row, 4)?,
        input_id: row.get(5)?,
        spending_tx_id: row.get::<_, Option<i64>>(6)?.map(TxId),
        vin: opt_u32(row, 7)?,
        height: opt_u64(row, 8)?,
    })
}

fn script_row(row: &Row<'_>) -> rusqlite::Result<ScriptRow> {
    Ok(ScriptRow {
        id: ScriptId(row.get(0)?),
        address: row.get(1)?,
        pagination: Some(Pagination {
            contiguous_bound_tx_id: row.get::<_, Option<i64>>(2)?.map(TxId),
            fetch_newest_tx_id: row.get::<_, Option<i64>>(3)?.map(TxId),
            fetch_newest_tx_read_height: opt_u64(row, 4)?,
            fetch_oldest_tx_id: row.get::<_, Option<i64>>(5)?.map(TxId),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIP: &str = "blocks/tip/height";

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(StoreOptions::default().page_size(2)).unwrap()
    }

    fn tx_json(txid: &str, height: u64, prev: &[(&str, u32)], outputs: &[(&str, u64)]) -> String {
        let vin: Vec<String> = prev
            .iter()
            .map(|(txid, vout)| format!(r#"{{"txid":"{txid}","vout":{vout},"is_coinbase":false}}"#))
            .collect();
        let vout: Vec<String> = outputs
            .iter()
            .map(|(addr, value)| {
                format!(
                    r#"{{"scriptpubkey":"spk-{addr}","scriptpubkey_address":"{addr}","value":{value}}}"#
                )
            })
            .collect();
        format!(
            r#"{{"txid":"{txid}","vin":[{}],"vout":[{}],"status":{{"confirmed":true,"block_height":{height}}}}}"#,
            vin.join(","),
            vout.join(",")
        )
    }

    #[test]
    fn tx_response_creates_rows() -> StoreResult<()> {
        let store = store();
        let body = tx_json("bb", 10, &[("aa", 1)], &[("x", 5), ("y", 6)]);
        store.insert_response("tx/bb", &body)?;

        let tx = store.tx_by_txid("bb")?.unwrap();
        assert_eq!(tx.height, Some(10));
        assert_eq!(tx.input_count, Some(1));
        assert_eq!(tx.output_count, Some(2));

        let outputs = store.tx_outputs(tx.id)?;
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].vout, Some(1));
        assert_eq!(outputs[1].sats, Some(6));
        assert_eq!(outputs[0].spending_tx_id, None);

        let inputs = store.tx_inputs(tx.id)?;
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].vout, Some(1));
        assert_eq!(inputs[0].vin, Some(0));
        assert_eq!(inputs[0].spending_tx_id, Some(tx.id));
        // a spent output reports the spender's height
        assert_eq!(inputs[0].height, Some(10));

        let prev = store.tx_by_txid("aa")?.unwrap();
        assert_eq!(prev.height, None);
        assert_eq!(inputs[0].funding_tx_id, Some(prev.id));
        assert_eq!(store.response_count("tx/bb")?, 1);
        Ok(())
    }

    #[test]
    fn coinbase_inputs_are_not_counted() -> StoreResult<()> {
        let store = store();
        let body = r#"{"txid":"cb","vin":[{"txid":"0000","vout":4294967295,"is_coinbase":true}],
            "vout":[{"scriptpubkey":"51","value":50}],"status":{"confirmed":true,"block_height":1}}"#;
        store.insert_response("tx/cb", body)?;
        let tx = store.tx_by_txid("cb")?.unwrap();
        assert_eq!(tx.input_count, Some(0));
        assert!(store.tx_inputs(tx.id)?.is_empty());
        assert!(store.tx_by_txid("0000")?.is_none());
        Ok(())
    }

    #[test]
    fn outspends_record_spenders_and_unspent_height() -> StoreResult<()> {
        let store = store();
        store.insert_response("tx/aa", &tx_json("aa", 3, &[], &[("x", 1), ("y", 2)]))?;
        store.insert_response(TIP, "40")?;
        store.insert_response(
            "tx/aa/outspends",
            r#"[{"spent":true,"txid":"cc","vin":1,"status":{"confirmed":true,"block_height":9}},{"spent":false}]"#,
        )?;
        let aa = store.tx_by_txid("aa")?.unwrap();
        let outputs = store.tx_outputs(aa.id)?;
        let cc = store.tx_by_txid("cc")?.unwrap();
        assert_eq!(outputs[0].spending_tx_id, Some(cc.id));
        assert_eq!(outputs[0].vin, Some(1));
        assert_eq!(outputs[0].height, Some(9));
        assert_eq!(outputs[1].spending_tx_id, None);
        assert_eq!(outputs[1].height, Some(40));

        // an older tip never lowers the recorded height
        store.insert_response(TIP, "30")?;
        store.insert_response("tx/aa/outspends", r#"[{"spent":true,"txid":"cc","vin":1},{"spent":false}]"#)?;
        assert_eq!(store.output(outputs[1].id)?.unwrap().height, Some(40));
        assert_eq!(store.chain_tip()?, Some(40));
        Ok(())
    }

    #[test]
    fn history_pages_maintain_bookkeeping() -> StoreResult<()> {
        let store = store();
        store.insert_response(TIP, "100")?;
        let page1 = format!(
            "[{},{}]",
            tx_json("t3", 90, &[], &[("addr", 1)]),
            tx_json("t2", 80, &[], &[("addr", 1)])
        );
        store.insert_response("address/addr/txs/chain", &page1)?;
        let script = store.script_by_address("addr")?.unwrap();
        let t3 = store.tx_by_txid("t3")?.unwrap().id;
        let t2 = store.tx_by_txid("t2")?.unwrap().id;
        assert_eq!(
            script.pagination,
            Some(Pagination {
                contiguous_bound_tx_id: None,
                fetch_newest_tx_id: Some(t3),
                fetch_newest_tx_read_height: Some(100),
                fetch_oldest_tx_id: Some(t2),
            })
        );
        assert_eq!(
            store.interrupted_fetches()?,
            vec![InterruptedFetch {
                address: "addr".into(),
                oldest_txid: "t2".into(),
            }]
        );

        let page2 = format!("[{}]", tx_json("t1", 70, &[], &[("addr", 1)]));
        store.insert_response("address/addr/txs/chain/t2", &page2)?;
        let script = store.script_by_address("addr")?.unwrap();
        assert_eq!(
            script.pagination,
            Some(Pagination {
                contiguous_bound_tx_id: Some(t3),
                fetch_newest_tx_id: None,
                fetch_newest_tx_read_height: Some(100),
                fetch_oldest_tx_id: None,
            })
        );
        assert!(store.interrupted_fetches()?.is_empty());

        let funding = store.script_funding_txs(script.id)?;
        let txids: Vec<_> = funding.iter().filter_map(|tx| tx.txid.clone()).collect();
        assert_eq!(txids, ["t3", "t2", "t1"]);
        Ok(())
    }

    #[test]
    fn refresh_stops_at_previous_bound() -> StoreResult<()> {
        let store = store();
        store.insert_response(TIP, "100")?;
        store.insert_response(
            "address/addr/txs/chain",
            &format!("[{}]", tx_json("t1", 70, &[], &[("addr", 1)])),
        )?;
        let t1 = store.tx_by_txid("t1")?.unwrap().id;

        store.insert_response(TIP, "120")?;
        let page = format!(
            "[{},{}]",
            tx_json("t2", 110, &[], &[("addr", 1)]),
            tx_json("t1", 70, &[], &[("addr", 1)])
        );
        store.insert_response("address/addr/txs/chain", &page)?;
        let t2 = store.tx_by_txid("t2")?.unwrap().id;
        let script = store.script_by_address("addr")?.unwrap();
        assert_eq!(
            script.pagination,
            Some(Pagination {
                contiguous_bound_tx_id: Some(t2),
                fetch_newest_tx_id: None,
                fetch_newest_tx_read_height: Some(120),
                fetch_oldest_tx_id: None,
            })
        );
        assert_ne!(t1, t2);
        Ok(())
    }

    #[test]
    fn empty_history_is_complete() -> StoreResult<()> {
        let store = store();
        store.insert_response(TIP, "5")?;
        store.insert_response("address/nobody/txs/chain", "[]")?;
        let script = store.script_by_address("nobody")?.unwrap();
        assert_eq!(
            script.pagination,
            Some(Pagination {
                fetch_newest_tx_read_height: Some(5),
                ..Pagination::default()
            })
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_paths_and_bad_bodies() {
        let store = store();
        assert!(matches!(
            store.insert_response("mempool", "{}"),
            Err(StoreError::UnknownPath(_))
        ));
        assert!(matches!(
            store.insert_response("tx/aa", "not json"),
            Err(StoreError::Decode { .. })
        ));
        // the failed ingest rolled back the recorded body
        assert_eq!(store.response_count("tx/aa").unwrap(), 0);
    }

    #[test]
    fn reopen_keeps_data() -> StoreResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.sqlite");
        {
            let store = SqliteStore::open(&path, StoreOptions::default())?;
            store.insert_response("tx/aa", &tx_json("aa", 3, &[], &[("x", 1)]))?;
        }
        let store = SqliteStore::open(&path, StoreOptions::default())?;
        assert_eq!(store.tx_by_txid("aa")?.unwrap().output_count, Some(1));
        Ok(())
    }
}
