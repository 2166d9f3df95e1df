use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use receptor_grpc::{cancel_pair, CancelSignal, MemoryOpener, ReceptorClient, StreamOpener, TonicOpener};
use receptor_report::{build_spool, report_bundles, BundleOutcome, EvidenceBundle};
use receptor_wire::{MultipartReader, ReaderOptions, StreamContentType};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
#[macro_use]
mod logging;
mod manifest;

use config::ReceptorConfig;
use logging::ReceptorLogFormatter;
use manifest::{BundleEntry, DocumentEntry, Manifest, DEFAULT_RECEPTOR_TYPE};

#[derive(Parser)]
#[command(name = "receptor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package evidence bundles and stream them to a collector")]
struct Args {
    /// Configuration file path (defaults to ~/.receptor.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Collector host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Collector port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Per-call timeout, e.g. "30s" or "2m"
    #[arg(long, global = true)]
    timeout: Option<humantime::Duration>,

    /// Transport unit size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Bundles reported concurrently
    #[arg(long, global = true)]
    max_concurrent_bundles: Option<usize>,

    /// Build and inspect bundles without contacting the collector
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Package bundles and report them to the collector
    Send(SendArgs),
    /// Write one bundle's multipart stream to a file
    Build(BuildArgs),
    /// Print the part metadata of a multipart stream file as JSON
    Inspect(InspectArgs),
}

#[derive(ClapArgs)]
struct BundleArgs {
    /// YAML manifest listing bundles; replaces the per-bundle flags below
    #[arg(long, conflicts_with_all = ["files", "bytes_from", "caption"])]
    manifest: Option<PathBuf>,

    /// Document streamed from disk, as PATH[:MIME] (repeatable)
    #[arg(long = "file", value_name = "PATH[:MIME]")]
    files: Vec<String>,

    /// Document read into memory, as PATH[:MIME] (repeatable)
    #[arg(long = "bytes-from", value_name = "PATH[:MIME]")]
    bytes_from: Vec<String>,

    /// Evidence caption
    #[arg(long)]
    caption: Option<String>,

    /// Evidence description
    #[arg(long, default_value = "")]
    description: String,

    /// Service the evidence was collected from
    #[arg(long, default_value = "")]
    service_name: String,

    /// Entity type of the evidence
    #[arg(long, default_value = "")]
    entity_type: String,

    /// Receptor type reported in the finding
    #[arg(long)]
    receptor_type: Option<String>,

    /// Service provider account
    #[arg(long, default_value = "")]
    account: String,
}

#[derive(ClapArgs)]
struct SendArgs {
    #[command(flatten)]
    bundle: BundleArgs,

    /// Delete file-backed documents once they have been packaged
    #[arg(long)]
    remove_source_files: bool,
}

#[derive(ClapArgs)]
struct BuildArgs {
    #[command(flatten)]
    bundle: BundleArgs,

    /// Destination of the multipart stream
    #[arg(long, short)]
    output: PathBuf,
}

#[derive(ClapArgs)]
struct InspectArgs {
    /// Multipart stream file
    path: PathBuf,

    /// Stream content type carrying the boundary
    #[arg(long, conflicts_with = "boundary", required_unless_present = "boundary")]
    content_type: Option<String>,

    /// Boundary token
    #[arg(long)]
    boundary: Option<String>,

    /// Fail on size or digest mismatches instead of warning
    #[arg(long)]
    strict: bool,
}

impl BundleArgs {
    fn into_bundles(self) -> Result<Vec<EvidenceBundle>> {
        if let Some(path) = &self.manifest {
            let mut manifest = Manifest::load(path)?;
            if manifest.receptor_type.is_none() {
                manifest.receptor_type = self.receptor_type;
            }
            if manifest.account.is_empty() {
                manifest.account = self.account;
            }
            return Ok(manifest.into_bundles());
        }

        let documents = self
            .files
            .iter()
            .map(|raw| DocumentEntry::parse_flag(raw, false))
            .chain(self.bytes_from.iter().map(|raw| DocumentEntry::parse_flag(raw, true)))
            .collect();
        let caption = self
            .caption
            .context("--caption is required unless --manifest is given")?;
        let entry = BundleEntry {
            caption,
            description: self.description,
            service_name: self.service_name,
            entity_type: self.entity_type,
            documents,
            sources: Vec::new(),
        };
        let receptor_type = self.receptor_type.as_deref().unwrap_or(DEFAULT_RECEPTOR_TYPE);
        Ok(vec![entry.into_bundle(receptor_type, &self.account)])
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("receptor={}", args.log_level).parse()?)
        .add_directive(format!("receptor_wire={}", args.log_level).parse()?)
        .add_directive(format!("receptor_grpc={}", args.log_level).parse()?)
        .add_directive(format!("receptor_report={}", args.log_level).parse()?);

    let formatter = ReceptorLogFormatter::new("receptor".to_string());

    // Logs go to stderr so stdout stays clean for summaries
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(formatter)
        .init();

    info!("Starting receptor v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(ReceptorConfig::default_path);
    let mut config = ReceptorConfig::load_from_file(&config_path)?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    match args.command {
        Command::Send(send) => run_send(&config, send).await,
        Command::Build(build) => run_build(&config, build),
        Command::Inspect(inspect) => run_inspect(&config, inspect),
    }
}

fn apply_cli_overrides(config: &mut ReceptorConfig, args: &Args) {
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout) = &args.timeout {
        config.timeout = timeout.as_secs().max(1);
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(max) = args.max_concurrent_bundles {
        config.max_concurrent_bundles = max;
    }
    if args.dry_run {
        config.dry_run = true;
    }
}

async fn run_send(config: &ReceptorConfig, args: SendArgs) -> Result<()> {
    let bundles = args.bundle.into_bundles()?;
    let cancel = spawn_interrupt_watcher();
    let options = config.batch_options(args.remove_source_files, cancel);

    let opener: Box<dyn StreamOpener> = if config.dry_run {
        component_info!("batch", "Dry run: bundles are built and inspected locally");
        Box::new(MemoryOpener::new())
    } else {
        let client = ReceptorClient::connect(&config.client_config())
            .await
            .with_context(|| format!("failed to connect to collector {}:{}", config.host, config.port))?;
        component_info!("grpc", "Connected to collector {}:{}", config.host, config.port);
        Box::new(TonicOpener::new(client))
    };

    let outcomes = report_bundles(bundles, opener.as_ref(), &options).await;
    print_outcomes(&outcomes);

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            component_error!("batch", "Bundle {} ({}) was not reported", outcome.caption, outcome.id);
        }
        anyhow::bail!("{} of {} evidence bundles failed", failed, outcomes.len());
    }
    Ok(())
}

fn print_outcomes(outcomes: &[BundleOutcome]) {
    for outcome in outcomes {
        match (&outcome.result, &outcome.dry_run_summary) {
            (Ok(_), Some(summary)) => {
                println!("# {} ({})", outcome.caption, outcome.id);
                println!("{}", summary);
            }
            (Ok(sent), None) => println!(
                "ok      {}  {} chunks, {} bytes  ({})",
                outcome.caption, sent.chunks, sent.bytes, outcome.id
            ),
            (Err(e), _) => println!("failed  {}  {}  ({})", outcome.caption, e, outcome.id),
        }
    }
}

fn run_build(config: &ReceptorConfig, args: BuildArgs) -> Result<()> {
    let mut bundles = args.bundle.into_bundles()?;
    if bundles.len() != 1 {
        anyhow::bail!("build writes exactly one bundle, got {}", bundles.len());
    }
    let bundle = bundles.remove(0);

    let parts = bundle.to_parts()?;
    let options = config.package_options(false, CancelSignal::never());
    let (spool, content_type) = build_spool(&parts, bundle.payload_media_type(), &options)?;
    component_debug!("build", "Spool {} built for bundle {}", spool.path().display(), bundle.caption());
    let written = spool.persist(&args.output)?;

    component_info!("build", "Wrote {} parts to {}", parts.len(), written.display());
    println!("{}", content_type);
    Ok(())
}

fn run_inspect(config: &ReceptorConfig, args: InspectArgs) -> Result<()> {
    let boundary = match (&args.content_type, args.boundary) {
        (Some(raw), _) => raw
            .parse::<StreamContentType>()
            .with_context(|| format!("invalid content type {:?}", raw))?
            .boundary,
        (None, Some(boundary)) => boundary,
        (None, None) => anyhow::bail!("either --content-type or --boundary is required"),
    };

    let file = std::fs::File::open(&args.path)
        .with_context(|| format!("failed to open {}", args.path.display()))?;
    let options = ReaderOptions {
        buffer_size: config.buffer_size,
        strict: args.strict,
    };
    let mut reader = MultipartReader::with_options(file, &boundary, options)?;

    let stdout = std::io::stdout();
    let parts = reader.metadata_summary(stdout.lock())?;
    println!();
    component_info!("inspect", "Inspected {} parts in {}", parts.len(), args.path.display());
    Ok(())
}

/// Cancel in-flight transmissions on Ctrl-C
fn spawn_interrupt_watcher() -> CancelSignal {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                component_warn!("batch", "Interrupted, cancelling in-flight bundles");
                handle.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    signal
}
