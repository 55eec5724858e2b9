#![allow(missing_docs)]

use std::rc::Rc;

use tokio::task::LocalSet;
use txgraph::{
    FetchState, GraphError, Orchestrator, Result, ScriptField, SqliteStore, StaticClient,
    StoreOptions,
};

const ADDRESS: &str = "bc1qhistory";
const TIP: &str = "blocks/tip/height";

fn txid(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

/// A confirmed transaction paying `sats` to [`ADDRESS`].
fn payment(n: u8, height: u64, sats: u64) -> String {
    format!(
        r#"{{"txid":"{}","vin":[],"vout":[{{"scriptpubkey":"0014aa","scriptpubkey_address":"{ADDRESS}","value":{sats}}}],"status":{{"confirmed":true,"block_height":{height}}}}}"#,
        txid(n)
    )
}

fn page(txs: &[String]) -> String {
    format!("[{}]", txs.join(","))
}

fn first_page() -> String {
    format!("address/{ADDRESS}/txs/chain")
}

fn page_after(n: u8) -> String {
    format!("address/{ADDRESS}/txs/chain/{}", txid(n))
}

fn orchestrator(store: SqliteStore, client: &Rc<StaticClient>) -> Orchestrator {
    Orchestrator::new(Box::new(store), client.clone())
}

fn small_pages() -> SqliteStore {
    SqliteStore::open_in_memory(StoreOptions::default().page_size(2)).unwrap()
}

#[tokio::test]
async fn short_first_page_is_contiguous() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(first_page(), page(&[payment(1, 50, 10)]));
            let orch = orchestrator(small_pages(), &client);

            let script = orch.load_script_by_address(ADDRESS).await?;
            assert_eq!(script.state(None), FetchState::Contiguous { read_height: 100 });
            assert_eq!(script.sync_history(None).await?, FetchState::Contiguous { read_height: 100 });

            let bound = script.contiguous_bound_tx().await?.unwrap();
            assert_eq!(bound.txid().await?, txid(1));
            assert_eq!(client.requests(), vec![TIP.to_string(), first_page()]);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn empty_history_is_contiguous_without_bound() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client.respond(TIP, "100").respond(first_page(), "[]");
            let orch = orchestrator(small_pages(), &client);

            let script = orch.load_script_by_address(ADDRESS).await?;
            assert_eq!(script.state(None), FetchState::Contiguous { read_height: 100 });
            assert!(script.contiguous_bound_tx().await?.is_none());
            assert!(script.transactions(None).await?.is_empty());
            Ok(())
        })
        .await
}

#[tokio::test]
async fn required_height_reopens_a_contiguous_history() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(TIP, "130")
                .respond(first_page(), page(&[payment(1, 50, 10)]))
                .respond(
                    first_page(),
                    page(&[payment(3, 125, 30), payment(2, 110, 20)]),
                )
                .fail(page_after(2), 502, "bad gateway")
                .respond(page_after(2), page(&[payment(1, 50, 10)]));
            let orch = orchestrator(small_pages(), &client);
            let script = orch.load_script_by_address(ADDRESS).await?;
            let first_bound = script.entity().contiguous_bound_tx().read_value().flatten();
            assert!(first_bound.is_some());

            assert_eq!(script.state(Some(120)), FetchState::Stale { read_height: 100 });
            assert_eq!(script.state(None), FetchState::Contiguous { read_height: 100 });

            // the refresh gets one full page, then the continuation fails
            let err = script.sync_history(Some(120)).await.unwrap_err();
            assert!(matches!(err, GraphError::Fetch(_)));
            assert_eq!(script.state(Some(120)), FetchState::InProgress);
            assert_eq!(
                script.entity().contiguous_bound_tx().read_value().flatten(),
                first_bound
            );

            // retrying continues where the refresh stopped
            let state = script.sync_history(Some(120)).await?;
            assert_eq!(state, FetchState::Contiguous { read_height: 130 });
            let bound = script.contiguous_bound_tx().await?.unwrap();
            assert_eq!(bound.txid().await?, txid(3));
            assert_eq!(client.request_count(&first_page()), 2);
            assert_eq!(client.request_count(&page_after(2)), 2);

            let mut txids = Vec::new();
            for tx in script.transactions(Some(120)).await? {
                txids.push(tx.txid().await?);
            }
            assert_eq!(txids, vec![txid(3), txid(2), txid(1)]);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn source_behind_required_height_stays_stale() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(first_page(), page(&[payment(1, 50, 10)]));
            let orch = orchestrator(small_pages(), &client);
            let script = orch.load_script_by_address(ADDRESS).await?;

            let state = script.sync_history(Some(500)).await?;
            assert_eq!(state, FetchState::Stale { read_height: 100 });
            assert_eq!(client.request_count(&first_page()), 2);

            // the same refresh is not downloaded twice
            script.sync_history(Some(500)).await?;
            assert_eq!(client.request_count(&first_page()), 2);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn continuation_without_progress_is_stalled() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(first_page(), page(&[payment(2, 60, 20), payment(1, 50, 10)]))
                .respond(page_after(1), page(&[payment(2, 60, 20), payment(1, 50, 10)]));
            let orch = orchestrator(small_pages(), &client);
            let script = orch.load_script_by_address(ADDRESS).await?;
            assert_eq!(script.state(None), FetchState::InProgress);

            let err = script.sync_history(None).await.unwrap_err();
            assert!(matches!(err, GraphError::Stalled { .. }));
            Ok(())
        })
        .await
}

#[tokio::test]
async fn failed_history_load_is_reported_by_the_bound_cell() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(first_page(), page(&[payment(2, 60, 20), payment(1, 50, 10)]))
                .fail(page_after(1), 502, "bad gateway")
                .respond(page_after(1), page(&[payment(0, 40, 5)]));
            let orch = orchestrator(small_pages(), &client);
            let script = orch.load_script_by_address(ADDRESS).await?;
            assert_eq!(script.state(None), FetchState::InProgress);
            assert!(script.has_value(ScriptField::ContiguousBoundTx));

            let bound = script.load(ScriptField::ContiguousBoundTx).contiguous_bound_tx();
            let err = bound.await_value().await.unwrap_err();
            assert!(matches!(err, GraphError::Fetch(_)));
            assert_eq!(orch.outstanding_loads(), 0);
            // the placeholder stays readable, but awaiting reports the failure
            assert_eq!(bound.read_value(), Some(None));
            assert!(bound.failure().is_some());
            assert!(bound.await_value().await.is_err());

            let bound = script.load(ScriptField::ContiguousBoundTx).contiguous_bound_tx();
            let id = bound.await_value().await?.unwrap();
            assert!(bound.failure().is_none());
            assert_eq!(orch.tx(id).txid().await?, txid(2));
            assert_eq!(script.state(None), FetchState::Contiguous { read_height: 100 });
            assert_eq!(client.request_count(&page_after(1)), 2);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn interrupted_fetch_resumes_in_a_new_session() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let options = StoreOptions::default().page_size(2);

    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client
                .respond(TIP, "100")
                .respond(first_page(), page(&[payment(2, 60, 20), payment(1, 50, 10)]));
            let orch = orchestrator(SqliteStore::open(&path, options.clone())?, &client);
            let script = orch.load_script_by_address(ADDRESS).await?;
            assert_eq!(script.state(None), FetchState::InProgress);
            assert!(script.sync_history(None).await.is_err());
            Ok::<_, GraphError>(())
        })
        .await?;

    LocalSet::new()
        .run_until(async {
            let client = Rc::new(StaticClient::new());
            client.respond(page_after(1), page(&[payment(0, 40, 5)]));
            let orch = orchestrator(SqliteStore::open(&path, options.clone())?, &client);

            let resumed = orch.resume_interrupted().await?;
            assert_eq!(resumed.len(), 1);
            assert_eq!(resumed[0].address().await?, ADDRESS);
            assert_eq!(
                resumed[0].state(None),
                FetchState::Contiguous { read_height: 100 }
            );
            assert_eq!(client.requests(), vec![page_after(1)]);

            let bound = resumed[0].contiguous_bound_tx().await?.unwrap();
            assert_eq!(bound.txid().await?, txid(2));
            assert!(orch.resume_interrupted().await?.is_empty());
            Ok(())
        })
        .await
}
