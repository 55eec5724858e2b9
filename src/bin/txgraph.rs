//! Command line front end for browsing the transaction graph.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;
use txgraph::{
    Config, HttpClient, LazyScript, LazyTx, Orchestrator, SqliteStore, StoreOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "txgraph",
    version,
    about = "Lazily browse the Bitcoin transaction graph through an Esplora API",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "FILE", help = "SQLite store path")]
    db: Option<PathBuf>,

    #[arg(long, global = true, value_name = "URL", help = "Esplora API base URL")]
    api_base: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Show a transaction with its outputs and their spenders")]
    Tx {
        #[arg(value_name = "TXID")]
        txid: String,
    },

    #[command(about = "Sync and list the transaction history of an address")]
    Address {
        #[arg(value_name = "ADDRESS")]
        address: String,

        #[arg(long, help = "Refresh the history if it is older than this block height")]
        height: Option<u64>,
    },

    #[command(about = "Finish history fetches interrupted by an earlier run")]
    Resume,

    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct TxReport {
    txid: String,
    height: Option<u64>,
    input_count: u32,
    output_count: u32,
    outputs: Vec<OutputReport>,
}

#[derive(Debug, Serialize)]
struct OutputReport {
    vout: u32,
    sats: u64,
    spent_by: Option<String>,
    height: u64,
}

#[derive(Debug, Serialize)]
struct HistoryReport {
    address: String,
    state: String,
    transactions: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    txid: String,
    height: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = LocalSet::new().run_until(run()).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db.clone() {
        config.database = Some(db);
    }
    if let Some(api_base) = cli.api_base.clone() {
        config.api_base = api_base;
    }
    init_tracing(&config.log_filter);

    if let Command::Config = cli.command {
        let rendered = config.to_toml()?;
        return emit(cli.format, &config, || print!("{rendered}"));
    }

    let orch = open(&config)?;
    let result = dispatch(&orch, &cli).await;
    orch.abort_loads();
    result
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open(config: &Config) -> Result<Orchestrator, Box<dyn Error>> {
    let options = StoreOptions::default().page_size(config.page_size);
    let store = match &config.database {
        Some(path) => SqliteStore::open(path, options)?,
        None => SqliteStore::open_in_memory(options)?,
    };
    let client = HttpClient::new(config.api_base.clone())?;
    Ok(Orchestrator::new(Box::new(store), Rc::new(client)))
}

async fn dispatch(orch: &Orchestrator, cli: &Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Command::Tx { txid } => {
            let tx = orch.load_tx_by_txid(txid).await?;
            let report = tx_report(&tx).await?;
            emit(cli.format, &report, || print_tx_text(&report))
        }
        Command::Address { address, height } => {
            let script = orch.load_script_by_address(address).await?;
            let report = history_report(address, &script, *height).await?;
            emit(cli.format, &report, || print_history_text(&report))
        }
        Command::Resume => {
            let mut reports = Vec::new();
            for script in orch.resume_interrupted().await? {
                let address = script.address().await?;
                reports.push(history_report(&address, &script, None).await?);
            }
            emit(cli.format, &reports, || {
                if reports.is_empty() {
                    println!("no interrupted fetches");
                }
                for report in &reports {
                    print_history_text(report);
                }
            })
        }
        Command::Config => Ok(()),
    }
}

async fn tx_report(tx: &LazyTx) -> txgraph::Result<TxReport> {
    let txid = tx.txid().await?;
    let input_count = tx.input_count().await?;
    let output_count = tx.output_count().await?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for output in tx.outputs().await? {
        let spent_by = match output.spend_status().await? {
            Some(spender) => Some(spender.txid().await?),
            None => None,
        };
        outputs.push(OutputReport {
            vout: output.vout().await?,
            sats: output.sats().await?,
            spent_by,
            height: output.height(),
        });
    }
    Ok(TxReport {
        txid,
        // unconfirmed transactions never get a height
        height: tx.entity().height().read_value(),
        input_count,
        output_count,
        outputs,
    })
}

async fn history_report(
    address: &str,
    script: &LazyScript,
    required: Option<u64>,
) -> txgraph::Result<HistoryReport> {
    let mut transactions = Vec::new();
    for tx in script.transactions(required).await? {
        transactions.push(HistoryEntry {
            txid: tx.txid().await?,
            height: tx.entity().height().read_value(),
        });
    }
    Ok(HistoryReport {
        address: address.to_string(),
        state: format!("{:?}", script.state(required)),
        transactions,
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_tx_text(report: &TxReport) {
    println!("{}", report.txid);
    match report.height {
        Some(height) => println!("  height:  {height}"),
        None => println!("  height:  unconfirmed"),
    }
    println!("  inputs:  {}", report.input_count);
    println!("  outputs: {}", report.output_count);
    for output in &report.outputs {
        match &output.spent_by {
            Some(spender) => println!(
                "  #{} {} sats, spent by {} at {}",
                output.vout, output.sats, spender, output.height
            ),
            None => println!(
                "  #{} {} sats, unspent as of {}",
                output.vout, output.sats, output.height
            ),
        }
    }
}

fn print_history_text(report: &HistoryReport) {
    println!("{} ({})", report.address, report.state);
    for entry in &report.transactions {
        match entry.height {
            Some(height) => println!("  {height:>8} {}", entry.txid),
            None => println!("  {:>8} {}", "mempool", entry.txid),
        }
    }
}
