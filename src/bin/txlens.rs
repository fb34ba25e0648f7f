#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use txlens::calltrace::flatten;
use txlens::gateway::{ProviderGateway, TracingUsageSink};
use txlens::sources::simulation::parse_call_frame_json;
use txlens::sources::{
    EtherscanExplorer, JsonRpcLedger, OfflineLabelStore, RpcTraceService, SelectorDatabase,
    Sources,
};
use txlens::{
    Analyzer, AnalyzerConfig, GatewayNarrator, JsonlProgressSink, NarratorConfig, ProgressSink,
    SourceEndpoints,
};

#[derive(Parser)]
#[command(name = "txlens", version, about = "Explain a blockchain transaction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a transaction and print the report as JSON
    Analyze {
        #[arg(long)]
        tx: String,
        #[arg(long, default_value_t = 1)]
        chain: u64,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Append progress events as JSON lines
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        no_verify: bool,
        /// Stream draft tokens as progress events
        #[arg(long)]
        stream: bool,
    },
    /// Print the flattened call list of a saved callTracer result
    Flatten {
        #[arg(long)]
        trace: PathBuf,
    },
}

fn build_sources(endpoints: &SourceEndpoints) -> Result<Sources, Box<dyn std::error::Error>> {
    let ledger = JsonRpcLedger::new(endpoints.rpc_url.clone())?;
    let mut sources = Sources::new(endpoints.chain_id, Arc::new(ledger));

    if let Some(url) = &endpoints.trace_rpc_url {
        sources = sources.with_trace(Arc::new(RpcTraceService::new(url.clone())?));
    }
    if endpoints.explorer_api_key.is_some() {
        let explorer = EtherscanExplorer::new(
            endpoints.explorer_url.clone(),
            endpoints.explorer_api_key.clone(),
            endpoints.chain_id,
        )?;
        sources = sources.with_explorer(Arc::new(explorer));
    } else {
        tracing::info!("ETHERSCAN_API_KEY not set, explorer disabled");
    }

    if let Some(path) = &endpoints.labels_path {
        let mut labels = OfflineLabelStore::builtin();
        let added = labels.load_json(path)?;
        tracing::debug!(added, path = %path.display(), "loaded labels");
        sources = sources.with_labels(Arc::new(labels));
    }
    if let Some(path) = &endpoints.selectors_path {
        let mut selectors = SelectorDatabase::builtin();
        let added = selectors.load_json(path)?;
        tracing::debug!(added, path = %path.display(), "loaded selectors");
        sources = sources.with_selectors(Arc::new(selectors));
    }
    Ok(sources)
}

fn write_json<T: serde::Serialize>(
    value: &T,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match out {
        Some(path) => {
            let file = File::create(path)?;
            serde_json::to_writer_pretty(file, value)?;
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            serde_json::to_writer_pretty(&mut handle, value)?;
            writeln!(handle)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txlens=info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            tx,
            chain,
            out,
            events,
            no_verify,
            stream,
        } => {
            let mut config = AnalyzerConfig::from_env()?;
            if no_verify {
                config.verification_enabled = false;
            }
            if stream {
                config.stream_draft = true;
            }

            let endpoints = SourceEndpoints::from_env(chain)?;
            let sources = build_sources(&endpoints)?;
            let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
            let narrator = GatewayNarrator::new(Arc::new(gateway), NarratorConfig::from_env()?);
            let analyzer = Analyzer::new(sources, Arc::new(narrator), config);

            let (sink, worker) = match events {
                Some(path) => {
                    let (sink, worker) = JsonlProgressSink::new(path)?;
                    (Some(sink), Some(worker))
                }
                None => (None, None),
            };
            let sink_ref = sink.as_ref().map(|s| s as &dyn ProgressSink);

            let report = analyzer.run(&tx, chain, sink_ref).await;

            drop(sink);
            if let Some(worker) = worker {
                worker.join()?;
            }

            write_json(&report, out)?;
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Flatten { trace } => {
            let raw = std::fs::read_to_string(trace)?;
            let root = parse_call_frame_json(&raw)?;
            write_json(&flatten(&root), None)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
