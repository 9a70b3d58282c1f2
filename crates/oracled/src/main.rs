//! Oracle Resolver daemon
//!
//! The `oracled` command runs the settlement loop and exposes the operator
//! paths around it.
//!
//! ## Commands
//!
//! - `run`: poll and settle until Ctrl-C
//! - `cycle`: a single pass, optionally at a fixed override price
//! - `settle`: settle one request at a given price; it may run beside `run`
//!   because the relay signs and orders every settlement
//! - `analyze`: static analysis of a script on disk
//! - `sanitize`: show how ancillary text is masked before generation
//! - `show-evidence`: print persisted evidence for a request

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use oracle_core::{
    analyze_script, init_tracing, sanitize_ancillary, CodeGenerator, EvidenceStore,
    FsEvidenceStore, ManualSettlement, ProcessExecutor, RequestId, ResolutionPipeline,
    ResolverConfig, SettlementQueue, SettlementRecord, SettlementScheduler,
};
use oracle_http::{OpenAiGenerator, RelayClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "oracled")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous resolver for on-chain yes/no price questions", long_about = None)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(short, long, global = true, env = "ORACLE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Override the evidence directory
    #[arg(long, global = true)]
    evidence_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll for pending requests and settle them until interrupted
    Run {
        /// Seconds between poll cycles
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Run without a code generator; requests are never resolved by script
        #[arg(long)]
        no_ai: bool,
    },

    /// Run a single poll cycle and print what was settled
    Cycle {
        /// Settle every due request at this price instead of resolving it
        #[arg(long, allow_negative_numbers = true)]
        price: Option<i64>,

        /// Run without a code generator
        #[arg(long)]
        no_ai: bool,
    },

    /// Settle one request at a fixed price
    ///
    /// Runs in its own process, next to any `oracled run`. Nonce ordering
    /// between the two is left to the relay, which signs every settlement.
    Settle {
        /// Request id (0x-prefixed 32-byte hex)
        request_id: String,

        /// Price to submit
        #[arg(allow_negative_numbers = true)]
        price: i64,
    },

    /// Statically analyze a resolution script
    Analyze {
        /// Path to a Python script
        file: PathBuf,
    },

    /// Show sanitized ancillary text and its placeholders
    Sanitize {
        /// Ancillary text as it appears on-chain
        text: String,
    },

    /// Print the evidence persisted for a settled request
    ShowEvidence {
        /// Request id (0x-prefixed 32-byte hex)
        request_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            poll_interval,
            no_ai,
        } => {
            let mut config = load_config(cli.config.as_deref(), cli.evidence_dir)?;
            if let Some(secs) = poll_interval {
                config.poll_interval_secs = secs;
                config.validate().context("Invalid --poll-interval")?;
            }
            cmd_run(config, no_ai).await
        }
        Commands::Cycle { price, no_ai } => {
            let config = load_config(cli.config.as_deref(), cli.evidence_dir)?;
            cmd_cycle(config, price, no_ai).await
        }
        Commands::Settle { request_id, price } => {
            let config = load_config(cli.config.as_deref(), cli.evidence_dir)?;
            cmd_settle(config, &request_id, price).await
        }
        Commands::Analyze { file } => cmd_analyze(&file),
        Commands::Sanitize { text } => cmd_sanitize(&text),
        Commands::ShowEvidence { request_id } => {
            let config = load_config(cli.config.as_deref(), cli.evidence_dir)?;
            cmd_show_evidence(&config, &request_id)
        }
    }
}

fn load_config(path: Option<&Path>, evidence_dir: Option<PathBuf>) -> Result<ResolverConfig> {
    let mut config = ResolverConfig::load(path).context("Failed to load resolver configuration")?;
    if let Some(dir) = evidence_dir {
        config.evidence_dir = dir;
    }
    Ok(config)
}

fn parse_request_id(raw: &str) -> Result<RequestId> {
    raw.parse()
        .with_context(|| format!("Invalid request id: {raw}"))
}

fn relay_from_env() -> Result<Arc<RelayClient>> {
    let relay = RelayClient::from_env().context("Failed to configure oracle relay")?;
    info!(relay = %relay.config().base_url, "using oracle relay");
    Ok(Arc::new(relay))
}

/// Generator from `AI_*` settings. Absence is not fatal: the scheduler then
/// only settles through the override path.
fn generator_from_env(disabled: bool) -> Option<Arc<dyn CodeGenerator>> {
    if disabled {
        info!("code generator disabled");
        return None;
    }
    match OpenAiGenerator::from_env() {
        Ok(generator) => {
            info!(
                api_base = %generator.config().api_base,
                model = %generator.config().model,
                "using code generator"
            );
            Some(Arc::new(generator))
        }
        Err(e) => {
            warn!(error = %e, "code generator unavailable");
            None
        }
    }
}

fn build_scheduler(config: ResolverConfig, no_ai: bool) -> Result<SettlementScheduler> {
    let relay = relay_from_env()?;
    let mut builder = SettlementScheduler::builder()
        .source(relay.clone())
        .sink(relay);

    if let Some(generator) = generator_from_env(no_ai) {
        let executor = ProcessExecutor::new(config.sandbox.clone())
            .context("Invalid sandbox configuration")?;
        builder = builder.pipeline(ResolutionPipeline::new(
            generator,
            Arc::new(executor),
            config.pipeline_config(),
        ));
    }

    builder
        .config(config)
        .build()
        .context("Failed to build settlement scheduler")
}

async fn cmd_run(config: ResolverConfig, no_ai: bool) -> Result<()> {
    let mut scheduler = build_scheduler(config, no_ai)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        trigger.cancel();
    });

    scheduler
        .run(shutdown)
        .await
        .context("Settlement scheduler failed")
}

async fn cmd_cycle(config: ResolverConfig, price: Option<i64>, no_ai: bool) -> Result<()> {
    let mut scheduler = build_scheduler(config, no_ai || price.is_some())?;
    let records = scheduler
        .run_cycle(price)
        .await
        .context("Poll cycle failed")?;

    if records.is_empty() {
        println!("Nothing settled.");
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

async fn cmd_settle(config: ResolverConfig, request_id: &str, price: i64) -> Result<()> {
    let id = parse_request_id(request_id)?;
    let relay = relay_from_env()?;
    let manual = ManualSettlement::new(
        relay.clone(),
        // Per-process queue; the relay orders against a concurrent `run`.
        SettlementQueue::new(relay),
        Arc::new(FsEvidenceStore::new(&config.evidence_dir)),
    );

    let record = manual
        .settle(&id, price)
        .await
        .with_context(|| format!("Failed to settle {id}"))?;
    print_record(&record);
    Ok(())
}

fn print_record(record: &SettlementRecord) {
    println!("✓ Settled {}", record.request_id);
    println!("  Price:         {}", record.price);
    println!("  Evidence hash: {}", record.evidence_hash);
    println!("  Tx:            {}", record.tx_hash);
}

fn cmd_analyze(file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script: {}", file.display()))?;
    let analysis = analyze_script(&source);

    println!("Script:     {}", file.display());
    println!("Confidence: {}", analysis.confidence());
    for issue in &analysis.issues {
        println!("  ✗ {issue}");
    }
    for warning in &analysis.warnings {
        println!("  ! {warning}");
    }

    if !analysis.success {
        bail!("{} issue(s) found", analysis.issues.len());
    }
    Ok(())
}

fn cmd_sanitize(text: &str) -> Result<()> {
    let sanitized = sanitize_ancillary(text);
    println!("{}", sanitized.text);
    if sanitized.is_masked() {
        println!();
        for placeholder in &sanitized.placeholders {
            println!(
                "{} = \"{}\"  # {}",
                placeholder.const_name, placeholder.token, placeholder.description
            );
        }
    }
    Ok(())
}

fn cmd_show_evidence(config: &ResolverConfig, request_id: &str) -> Result<()> {
    let id = parse_request_id(request_id)?;
    let store = FsEvidenceStore::new(&config.evidence_dir);
    let Some(evidence) = store
        .load(&id)
        .with_context(|| format!("Failed to read evidence for {id}"))?
    else {
        bail!("No evidence recorded for {id} in {}", store.dir().display());
    };

    let json = serde_json::to_string_pretty(&evidence)?;
    println!("{json}");
    Ok(())
}
