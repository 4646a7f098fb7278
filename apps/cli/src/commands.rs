//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};

use sitegen_adapters::{
    HttpNotifier, LocalImageOptimizer, OpenRouterSynthesizer, StoreIdentityProvisioner,
    SvgPaletteExtractor, TemplateSynthesizer,
};
use sitegen_artifacts::{ArtifactStore, UploadStaging, validate_asset_key};
use sitegen_core::{
    Collaborators, ContentSynthesizer, DispatchOutcome, Dispatcher, Orchestrator, PassOutcome,
    SilentObserver, Stage, StageObserver,
};
use sitegen_render::{FILE_SET, INDEX_HTML, StaticRenderer};
use sitegen_shared::{
    AppConfig, AssetPurpose, BusinessPayload, IntakeRecord, RecordId, RecordStatus, UploadedAsset,
    WorkerConfig, init_config, load_config, resolve_api_key,
};
use sitegen_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitegen: turn a small-business intake payload into a generated website.
#[derive(Parser)]
#[command(
    name = "sitegen",
    version,
    about = "Accept business intake payloads and generate their websites asynchronously.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override `[defaults] data_dir` from the config file.
    #[arg(long, global = true, env = "SITEGEN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Accept a business payload and queue it for generation.
    Intake {
        /// JSON file with the business payload.
        payload: PathBuf,

        /// Uploaded image as `key=purpose:path` (purpose: logo, hero, gallery).
        #[arg(long = "asset", value_parser = parse_asset_arg)]
        assets: Vec<AssetArg>,

        /// Only persist the record; leave generation to a running worker.
        #[arg(long)]
        detach: bool,
    },

    /// Run the periodic sweep until interrupted.
    Worker,

    /// Run one generation pass for a record in the foreground.
    Process {
        id: RecordId,
    },

    /// Show a record's status as a requester would see it.
    Status {
        id: RecordId,

        /// Print the full internal record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one file of a record's generated site.
    Preview {
        id: RecordId,

        /// File to print (index.html, styles.css, script.js).
        #[arg(long, default_value = INDEX_HTML)]
        file: String,
    },

    /// Re-render a generated record from its stored content.
    Rerender {
        id: RecordId,
    },

    /// Send a generated record back to the queue for a fresh pass.
    Requeue {
        id: RecordId,
    },

    /// List intake records.
    List {
        /// Filter by status: pending, generating, generated.
        #[arg(long)]
        status: Option<RecordStatus>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// One `--asset key=purpose:path` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AssetArg {
    pub key: String,
    pub purpose: AssetPurpose,
    pub path: PathBuf,
}

fn parse_asset_arg(raw: &str) -> std::result::Result<AssetArg, String> {
    let (key, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=purpose:path, got '{raw}'"))?;
    let (purpose, path) = rest
        .split_once(':')
        .ok_or_else(|| format!("expected key=purpose:path, got '{raw}'"))?;
    if key.is_empty() || path.is_empty() {
        return Err(format!("expected key=purpose:path, got '{raw}'"));
    }
    validate_asset_key(key).map_err(|e| e.to_string())?;
    let purpose = purpose.parse::<AssetPurpose>().map_err(|e| e.to_string())?;
    Ok(AssetArg {
        key: key.to_string(),
        purpose,
        path: PathBuf::from(path),
    })
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitegen=info",
        1 => "sitegen=debug",
        _ => "sitegen=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir;
    match cli.command {
        Command::Intake {
            payload,
            assets,
            detach,
        } => cmd_intake(data_dir, &payload, &assets, detach).await,
        Command::Worker => cmd_worker(data_dir).await,
        Command::Process { id } => cmd_process(data_dir, id).await,
        Command::Status { id, json } => cmd_status(data_dir, id, json).await,
        Command::Preview { id, file } => cmd_preview(data_dir, id, &file).await,
        Command::Rerender { id } => cmd_rerender(data_dir, id).await,
        Command::Requeue { id } => cmd_requeue(data_dir, id).await,
        Command::List { status } => cmd_list(data_dir, status).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(data_dir).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

fn resolved_config(data_dir: Option<PathBuf>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(dir) = data_dir {
        config.defaults.data_dir = dir.to_string_lossy().into_owned();
    }
    Ok(config)
}

/// Everything a command needs to touch on-disk state.
struct Runtime {
    config: AppConfig,
    storage: Arc<Storage>,
    artifacts: ArtifactStore,
    staging: UploadStaging,
}

impl Runtime {
    async fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let config = resolved_config(data_dir)?;
        let storage = Arc::new(Storage::open(&config.database_path()).await?);
        Ok(Self {
            artifacts: ArtifactStore::new(config.sites_dir()),
            staging: UploadStaging::new(config.staging_dir()),
            storage,
            config,
        })
    }

    /// Read-only view for commands that never write.
    async fn open_readonly(data_dir: Option<PathBuf>) -> Result<Self> {
        let config = resolved_config(data_dir)?;
        let path = config.database_path();
        if !path.exists() {
            return Err(eyre!(
                "no record store at '{}'; run `sitegen intake` first",
                path.display()
            ));
        }
        let storage = Arc::new(Storage::open_readonly(&path).await?);
        Ok(Self {
            artifacts: ArtifactStore::new(config.sites_dir()),
            staging: UploadStaging::new(config.staging_dir()),
            storage,
            config,
        })
    }

    fn synthesizer(&self) -> Result<Arc<dyn ContentSynthesizer>> {
        match resolve_api_key(&self.config) {
            Some(key) => Ok(Arc::new(OpenRouterSynthesizer::new(&self.config.openrouter, key)?)),
            None => {
                warn!(
                    env = %self.config.openrouter.api_key_env,
                    "no API key set, using template synthesizer"
                );
                Ok(Arc::new(TemplateSynthesizer))
            }
        }
    }

    fn collaborators(&self) -> Result<Collaborators> {
        let assets_dir = self.config.assets_dir();
        Ok(Collaborators {
            synthesizer: self.synthesizer()?,
            optimizer: Arc::new(LocalImageOptimizer::new(
                assets_dir.clone(),
                self.config.assets.max_bytes,
            )),
            palette: Arc::new(SvgPaletteExtractor::new(assets_dir)),
            renderer: Arc::new(StaticRenderer),
            identity: Arc::new(StoreIdentityProvisioner::new(Arc::clone(&self.storage))),
            notifier: Arc::new(HttpNotifier::new(&self.config.notify)?),
        })
    }

    fn dispatcher(&self, observer: Arc<dyn StageObserver>) -> Result<Arc<Dispatcher>> {
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.storage),
            self.artifacts.clone(),
            self.staging.clone(),
            self.collaborators()?,
            WorkerConfig::from(&self.config),
        )
        .with_operator_webhooks(self.config.notify.operator_webhooks.clone())
        .with_observer(observer);
        Ok(Arc::new(Dispatcher::new(Arc::new(orchestrator))))
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_intake(
    data_dir: Option<PathBuf>,
    payload_path: &Path,
    assets: &[AssetArg],
    detach: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(payload_path)
        .map_err(|e| eyre!("cannot read '{}': {e}", payload_path.display()))?;
    let business: BusinessPayload = serde_json::from_str(&raw)
        .map_err(|e| eyre!("'{}' is not a valid payload: {e}", payload_path.display()))?;
    business.validate()?;

    let uploads = assets
        .iter()
        .map(load_upload)
        .collect::<Result<Vec<_>>>()?;

    let runtime = Runtime::open(data_dir).await?;
    let record = accept_intake(&runtime, &business, &uploads).await?;

    info!(
        record_id = %record.id,
        business = %business.name,
        assets = uploads.len(),
        "record accepted"
    );

    println!();
    println!("  Record accepted");
    println!("  ID:     {}", record.id);
    println!("  Status: {}", record.coarse_status());
    println!("  Assets: {}", uploads.len());

    if detach {
        println!("  Generation will be picked up by `sitegen worker`.");
        println!();
        return Ok(());
    }

    let progress = Arc::new(CliProgress::new());
    let dispatcher = runtime.dispatcher(progress.clone())?;
    // Inline attempt; the sweep retries anything this leaves pending.
    if let Err(e) = dispatcher.schedule_inline(record.id).await {
        warn!(record_id = %record.id, error = %e, "inline attempt aborted");
    }
    progress.finish();

    print_status(&runtime, &record.id).await
}

/// Stage every upload under a fresh id, then insert the record. A record
/// never becomes dispatchable with its uploads missing.
async fn accept_intake(
    runtime: &Runtime,
    business: &BusinessPayload,
    uploads: &[UploadedAsset],
) -> Result<IntakeRecord> {
    let id = RecordId::new();
    let staged = uploads
        .iter()
        .try_for_each(|upload| runtime.staging.stage(&id, upload));
    if let Err(e) = staged {
        discard_staging(runtime, &id);
        return Err(e.into());
    }
    match runtime.storage.insert_record_with_id(id, business).await {
        Ok(record) => Ok(record),
        Err(e) => {
            discard_staging(runtime, &id);
            Err(e.into())
        }
    }
}

fn discard_staging(runtime: &Runtime, id: &RecordId) {
    if let Err(e) = runtime.staging.purge(id) {
        warn!(record_id = %id, error = %e, "failed to purge staged uploads");
    }
}

async fn cmd_worker(data_dir: Option<PathBuf>) -> Result<()> {
    let runtime = Runtime::open(data_dir).await?;
    let dispatcher = runtime.dispatcher(Arc::new(SilentObserver))?;
    let config = dispatcher.orchestrator().config();

    info!(
        worker = dispatcher.orchestrator().worker_id(),
        sweep_secs = config.sweep_interval.as_secs(),
        liveness_secs = config.liveness_window.as_secs(),
        "worker starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run_sweep(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("failed to listen for ctrl-c: {e}"))?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    sweeper
        .await
        .map_err(|e| eyre!("sweep task panicked: {e}"))?;
    Ok(())
}

async fn cmd_process(data_dir: Option<PathBuf>, id: RecordId) -> Result<()> {
    let runtime = Runtime::open(data_dir).await?;
    let progress = Arc::new(CliProgress::new());
    let dispatcher = runtime.dispatcher(progress.clone())?;

    let outcome = dispatcher.dispatch(&id).await;
    progress.finish();

    match outcome? {
        DispatchOutcome::AlreadyClaimed => println!("  {id} is already being processed."),
        DispatchOutcome::Ran(outcome) => print_outcome(&id, &outcome),
    }
    Ok(())
}

async fn cmd_status(data_dir: Option<PathBuf>, id: RecordId, json: bool) -> Result<()> {
    let runtime = Runtime::open_readonly(data_dir).await?;
    if json {
        let record = runtime
            .storage
            .get_record(&id)
            .await?
            .ok_or_else(|| eyre!("record {id} not found"))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    print_status(&runtime, &id).await
}

async fn cmd_preview(data_dir: Option<PathBuf>, id: RecordId, file: &str) -> Result<()> {
    if !FILE_SET.contains(&file) {
        return Err(eyre!(
            "unknown file '{file}': expected one of {}",
            FILE_SET.join(", ")
        ));
    }
    let runtime = Runtime::open_readonly(data_dir).await?;
    match runtime.artifacts.read(&id, file)? {
        Some(content) => {
            println!("{content}");
            Ok(())
        }
        None => Err(eyre!("no generated site for {id} yet")),
    }
}

async fn cmd_rerender(data_dir: Option<PathBuf>, id: RecordId) -> Result<()> {
    let runtime = Runtime::open(data_dir).await?;
    let dispatcher = runtime.dispatcher(Arc::new(SilentObserver))?;
    let Some(artifact) = dispatcher.rerender(&id).await? else {
        return Err(eyre!("{id} is being processed; try again later"));
    };

    println!();
    println!("  Site re-rendered");
    println!("  ID:        {id}");
    println!("  Theme:     {}", artifact.theme);
    println!("  Persisted: {}", artifact.persisted);
    println!("  Preview:   {}", artifact.preview_url);
    for file in &artifact.files {
        println!(
            "    {:<12} {} ({} bytes)",
            file.filename,
            short_hash(&file.sha256),
            file.size_bytes
        );
    }
    println!();
    Ok(())
}

async fn cmd_requeue(data_dir: Option<PathBuf>, id: RecordId) -> Result<()> {
    let runtime = Runtime::open(data_dir).await?;
    if runtime.storage.requeue(&id).await? {
        info!(record_id = %id, "record requeued");
        println!("  {id} requeued for generation.");
        Ok(())
    } else {
        Err(eyre!("{id} is not a generated record"))
    }
}

async fn cmd_list(data_dir: Option<PathBuf>, status: Option<RecordStatus>) -> Result<()> {
    let runtime = Runtime::open_readonly(data_dir).await?;
    let records = runtime.storage.list_records(status).await?;

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    println!(
        "{:<38} {:<11} {:<9} {:>8}  BUSINESS",
        "ID", "STATUS", "VISIBLE", "ATTEMPTS"
    );
    for record in &records {
        println!(
            "{:<38} {:<11} {:<9} {:>8}  {}",
            record.id.to_string(),
            record.status.as_str(),
            record.coarse_status().as_str(),
            record.attempts,
            record.business.name
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(data_dir: Option<PathBuf>) -> Result<()> {
    let config = resolved_config(data_dir)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn load_upload(arg: &AssetArg) -> Result<UploadedAsset> {
    let bytes = std::fs::read(&arg.path)
        .map_err(|e| eyre!("cannot read asset '{}': {e}", arg.path.display()))?;
    Ok(UploadedAsset {
        key: arg.key.clone(),
        purpose: arg.purpose,
        content_type: content_type_for(&arg.path).to_string(),
        bytes,
    })
}

fn short_hash(sha256: &str) -> &str {
    sha256.get(..12).unwrap_or(sha256)
}

/// Declared type from the extension. The optimizer re-checks the bytes.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn print_status(runtime: &Runtime, id: &RecordId) -> Result<()> {
    let record = runtime
        .storage
        .get_record(id)
        .await?
        .ok_or_else(|| eyre!("record {id} not found"))?;

    println!();
    println!("  ID:       {}", record.id);
    println!("  Business: {}", record.business.name);
    println!("  Status:   {}", record.coarse_status());
    if let Some(artifact) = runtime.storage.get_site_artifact(id).await? {
        println!("  Preview:  {}", artifact.preview_url);
        if !artifact.persisted {
            println!("  Note:     site files were not stored; run `sitegen rerender {id}`");
        }
    }
    println!();
    Ok(())
}

fn print_outcome(id: &RecordId, outcome: &PassOutcome) {
    println!();
    match outcome {
        PassOutcome::Skipped(reason) => println!("  Skipped {id}: {reason}"),
        PassOutcome::Failed { stage } => {
            println!("  Generation of {id} failed in the {stage} stage");
            println!("  The record is pending again and will be retried.");
        }
        PassOutcome::Generated(summary) => {
            println!("  Site generated!");
            println!("  ID:       {}", summary.record_id);
            println!("  Preview:  {}", summary.preview_url);
            println!(
                "  Assets:   {} optimized, {} lost",
                summary.assets_optimized, summary.assets_lost
            );
            println!(
                "  Content:  {}",
                if summary.content_reused { "reused" } else { "synthesized" }
            );
            println!("  Palette:  {}", summary.palette_source.as_str());
            println!(
                "  Notified: {}/{}",
                summary.notifications_delivered, summary.notifications_attempted
            );
            println!("  Time:     {:.1}s", summary.elapsed.as_secs_f64());
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Stage observer rendering an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl StageObserver for CliProgress {
    fn stage_started(&self, _record_id: &RecordId, stage: Stage) {
        self.spinner.set_message(stage.label().to_string());
    }

    fn pass_finished(&self, _record_id: &RecordId, _outcome: &PassOutcome) {
        self.spinner.finish_and_clear();
    }
}
