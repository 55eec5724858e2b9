#![allow(missing_docs)]

use std::rc::Rc;

use tokio::task::LocalSet;
use txgraph::{
    GraphError, Orchestrator, OutputField, Result, ScriptField, SqliteStore, StaticClient,
    StoreOptions, TxField,
};

const TXID: &str = "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16";
const FUNDING_TXID: &str = "0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9";
const SPENDER_0: &str = "ea44e97271691990157559d0bdd9959e02790c34db6c006d779e82fa5aee708e";
const SPENDER_1: &str = "a16f3ce4dd5deb92d98ef5cf8afeaf0775ebca408f708b2146c4fb42b41e14be";

const TX_BODY: &str = r#"{"txid":"f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16","version":1,"locktime":0,"vin":[{"txid":"0437cd7f8525ceed2324359c2d0ba26006d92d856a9c20fa0241106ee5a597c9","vout":0,"prevout":{"scriptpubkey":"410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac","scriptpubkey_asm":"OP_PUSHBYTES_65 0411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3 OP_CHECKSIG","scriptpubkey_type":"p2pk","value":5000000000},"scriptsig":"47304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901","scriptsig_asm":"OP_PUSHBYTES_71 304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901","is_coinbase":false,"sequence":4294967295}],"vout":[{"scriptpubkey":"4104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac","scriptpubkey_asm":"OP_PUSHBYTES_65 04ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84c OP_CHECKSIG","scriptpubkey_type":"p2pk","value":1000000000},{"scriptpubkey":"410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac","scriptpubkey_asm":"OP_PUSHBYTES_65 0411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3 OP_CHECKSIG","scriptpubkey_type":"p2pk","value":4000000000}],"size":275,"weight":1100,"fee":0,"status":{"confirmed":true,"block_height":170,"block_hash":"00000000d1145790a8694403d4063f323d499e655c83426834d4ce2f8dd4a2ee","block_time":1231731025}}"#;

const OUTSPENDS_BODY: &str = r#"[{"spent":true,"txid":"ea44e97271691990157559d0bdd9959e02790c34db6c006d779e82fa5aee708e","vin":0,"status":{"confirmed":true,"block_height":92240,"block_hash":"0000000000077430a94a5376bf2af42d4b1aebdecedfa9e4f7e3f0465a84d891","block_time":1289939967}},{"spent":true,"txid":"a16f3ce4dd5deb92d98ef5cf8afeaf0775ebca408f708b2146c4fb42b41e14be","vin":0,"status":{"confirmed":true,"block_height":181,"block_hash":"00000000dc55860c8a29c58d45209318fa9e9dc2c1833a7226d86bc465afc6e5","block_time":1231740133}}]"#;

fn tx_path() -> String {
    format!("tx/{TXID}")
}

fn outspends_path() -> String {
    format!("tx/{TXID}/outspends")
}

fn genesis_client() -> Rc<StaticClient> {
    let client = Rc::new(StaticClient::new());
    client
        .respond(tx_path(), TX_BODY)
        .respond(outspends_path(), OUTSPENDS_BODY);
    client
}

fn in_memory(client: &Rc<StaticClient>) -> Orchestrator {
    let store = SqliteStore::open_in_memory(StoreOptions::default()).unwrap();
    Orchestrator::new(Box::new(store), client.clone())
}

#[tokio::test]
async fn genesis_era_transaction_loads_lazily() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = genesis_client();
            let orch = in_memory(&client);

            let tx = orch.load_tx_by_txid(TXID).await?;
            assert_eq!(tx.input_count().await?, 1);
            assert_eq!(tx.output_count().await?, 2);
            assert_eq!(tx.height().await?, 170);

            let funding_txid = tx.inputs().await?[0].funding_tx().await?.txid().await?;
            assert_eq!(funding_txid, FUNDING_TXID);

            let output = tx.outputs().await?.remove(0);
            assert_eq!(output.sats().await?, 1_000_000_000);

            assert!(!output.has_value(OutputField::SpendingTxId));
            let spender = output.spending_tx().await?;
            assert_eq!(spender.txid().await?, SPENDER_0);
            assert!(output.has_value(OutputField::SpendingTxId));
            assert_eq!(output.vin().await?, 0);

            assert_eq!(client.request_count(&tx_path()), 1);
            assert_eq!(client.request_count(&outspends_path()), 1);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn pay_to_pubkey_scripts_have_no_history() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = genesis_client();
            let orch = in_memory(&client);
            let tx = orch.load_tx_by_txid(TXID).await?;
            let script = tx.outputs().await?[0].script().await?;

            let err = script.sync_history(None).await.unwrap_err();
            assert!(matches!(err, GraphError::Unresolved { field: "address", .. }));
            assert!(script.transactions(None).await.is_err());
            assert!(script.contiguous_bound_tx().await.is_err());
            assert!(!script.has_value(ScriptField::Address));
            assert_eq!(client.requests(), vec![tx_path()]);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn spend_reports_are_downloaded_once_for_all_outputs() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = genesis_client();
            let orch = in_memory(&client);
            let tx = orch.load_tx_by_txid(TXID).await?;
            let outputs = tx.outputs().await?;

            let (first, second) =
                tokio::join!(outputs[0].spending_tx(), outputs[1].spending_tx());
            let (first, second) = (first?, second?);
            assert_eq!(first.txid().await?, SPENDER_0);
            assert_eq!(second.txid().await?, SPENDER_1);
            assert_eq!(client.request_count(&outspends_path()), 1);

            // a spent output settles at its spender's height
            assert_eq!(outputs[0].height(), 92240);
            assert_eq!(outputs[1].height(), 181);
            assert_eq!(second.height().await?, 181);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn handles_share_canonical_entities() -> Result<()> {
    LocalSet::new()
        .run_until(async {
            let client = genesis_client();
            let orch = in_memory(&client);
            let tx = orch.load_tx_by_txid(TXID).await?;
            let again = orch.load_tx_by_txid(TXID).await?;
            assert!(Rc::ptr_eq(tx.entity(), again.entity()));

            let output = tx.outputs().await?.remove(1);
            let funding = output.funding_tx().await?;
            assert!(Rc::ptr_eq(funding.entity(), tx.entity()));

            // the second output and the spent prevout pay the same script
            let input = tx.inputs().await?.remove(0);
            assert_eq!(input.sats().await?, 5_000_000_000);
            let (a, b) = (output.script().await?, input.script().await?);
            assert!(Rc::ptr_eq(a.entity(), b.entity()));
            assert_eq!(client.requests().len(), 1);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn recorded_responses_serve_a_new_session() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");

    LocalSet::new()
        .run_until(async {
            let client = genesis_client();
            let store = SqliteStore::open(&path, StoreOptions::default())?;
            let orch = Orchestrator::new(Box::new(store), client.clone());
            let tx = orch.load_tx_by_txid(TXID).await?;
            for output in tx.outputs().await? {
                output.spend_status().await?;
            }
            Ok::<_, txgraph::GraphError>(())
        })
        .await?;

    LocalSet::new()
        .run_until(async {
            let offline = Rc::new(StaticClient::new());
            let store = SqliteStore::open(&path, StoreOptions::default())?;
            let orch = Orchestrator::new(Box::new(store), offline.clone());

            let tx = orch.load_tx_by_txid(TXID).await?;
            assert!(!tx.has_value(TxField::Outputs));
            let output = tx.outputs().await?.remove(0);
            let spender = output.spending_tx().await?;
            assert_eq!(spender.txid().await?, SPENDER_0);
            assert!(offline.requests().is_empty());
            Ok(())
        })
        .await
}
