use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use taxsale_client::{
    DocumentFetcher, ScriptRunner, StaticPageRenderer, TextLayerReader, VisionAssistant,
};
use taxsale_core::memory::{InMemoryStore, InMemoryTracker};
use taxsale_core::models::{NewSourceDocument, PropertyRecord, SaleType};
use taxsale_core::traits::{JobTracker, PropertyStore, Renderer};
use taxsale_core::{
    AppError, ExtractionOrchestrator, GivenNames, PipelineConfig, PipelineRunner, ProfileRegistry,
    TracingPipelineReporter,
};
use taxsale_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(
    name = "taxsale",
    version,
    about = "Extract property records from county tax sale lists"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process pending documents from the registry
    Run {
        /// Only process documents from this jurisdiction
        #[arg(short, long)]
        jurisdiction: Option<String>,

        /// Maximum number of documents to claim
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Documents processed concurrently
        #[arg(short, long, env = "TAXSALE_WORKERS", default_value_t = 4)]
        workers: usize,

        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        #[command(flatten)]
        strategies: StrategyArgs,
    },

    /// Extract a single document
    Extract {
        #[command(flatten)]
        document: DocumentArgs,

        /// Keep records in memory and print them instead of saving
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Output format for --dry-run
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[command(flatten)]
        strategies: StrategyArgs,
    },

    /// Register a document for the next run
    Register {
        #[command(flatten)]
        document: DocumentArgs,
    },

    /// Show the extraction audit trail
    Jobs {
        /// Only jobs for this document
        #[arg(short, long)]
        document: Option<Uuid>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show stored property records
    Records {
        #[arg(short, long)]
        jurisdiction: Option<String>,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List the format profiles in the registry
    Profiles {
        /// Directory of additional JSON profiles
        #[arg(long, env = "TAXSALE_PROFILES_DIR")]
        profiles_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct DocumentArgs {
    /// URL or local path of the document
    #[arg(long)]
    location: String,

    /// Jurisdiction identifier, e.g. "pa-blair"
    #[arg(short, long)]
    jurisdiction: String,

    /// Two-letter state code; selects parcel-number patterns
    #[arg(short, long)]
    state: String,

    /// Sale type hint (upset, judicial, repository, tax_deed, tax_lien)
    #[arg(long)]
    sale_type: Option<SaleType>,

    /// Sale date (YYYY-MM-DD)
    #[arg(long)]
    sale_date: Option<NaiveDate>,

    #[arg(long)]
    title: Option<String>,
}

impl DocumentArgs {
    fn into_new_document(self) -> NewSourceDocument {
        NewSourceDocument {
            jurisdiction_id: self.jurisdiction,
            state_code: self.state,
            title: self.title,
            location: self.location,
            sale_type_hint: self.sale_type,
            sale_date: self.sale_date,
        }
    }
}

/// Collaborator wiring shared by `run` and `extract`.
#[derive(Args)]
struct StrategyArgs {
    /// Wall-clock ceiling for one strategy attempt, in seconds
    #[arg(long, env = "TAXSALE_ATTEMPT_TIMEOUT_SECS", default_value_t = 120)]
    attempt_timeout_secs: u64,

    /// Command that runs jurisdiction extractors (custom-profile strategy)
    #[arg(long, env = "TAXSALE_CUSTOM_COMMAND")]
    custom_command: Option<String>,

    /// API key for the assisted strategy; leave unset to disable it
    #[arg(long, env = "TAXSALE_ASSIST_API_KEY", hide_env_values = true)]
    assist_api_key: Option<String>,

    /// Vision-capable model for the assisted strategy
    #[arg(long, env = "TAXSALE_ASSIST_MODEL", default_value = "gpt-4o")]
    assist_model: String,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "TAXSALE_ASSIST_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    assist_base_url: String,

    /// Directory of additional JSON format profiles
    #[arg(long, env = "TAXSALE_PROFILES_DIR")]
    profiles_dir: Option<PathBuf>,

    /// File of extra given names for owner-name cleanup, one per line
    #[arg(long, env = "TAXSALE_NAMES_FILE")]
    names_file: Option<PathBuf>,

    /// Render pages in headless Chromium instead of fetching static HTML
    #[cfg(feature = "browser")]
    #[arg(long, default_value_t = false)]
    browser: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so record output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("taxsale=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            jurisdiction,
            limit,
            workers,
            json,
            strategies,
        } => {
            let db = connect_db().await?;
            let config = PipelineConfig::default()
                .with_workers(workers)
                .with_batch_limit(limit)
                .with_jurisdiction(jurisdiction)
                .with_attempt_timeout(Duration::from_secs(strategies.attempt_timeout_secs));
            cmd_run(&db, config, &strategies, json).await?;
        }
        Commands::Extract {
            document,
            dry_run,
            format,
            strategies,
        } => {
            let new_document = document.into_new_document();
            if dry_run {
                cmd_extract_dry_run(new_document, &strategies, format).await?;
            } else {
                let db = connect_db().await?;
                cmd_extract(&db, new_document, &strategies).await?;
            }
        }
        Commands::Register { document } => {
            let db = connect_db().await?;
            let doc = db
                .document_repo()
                .register_document(document.into_new_document())
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Jobs { document, limit } => {
            let db = connect_db().await?;
            cmd_jobs(&db, document, limit).await?;
        }
        Commands::Records {
            jurisdiction,
            limit,
            format,
        } => {
            let db = connect_db().await?;
            let stored = db
                .property_repo()
                .list_properties(jurisdiction.as_deref(), limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            let records: Vec<PropertyRecord> = stored.into_iter().map(|s| s.record).collect();
            print_records(&records, format)?;
        }
        Commands::Profiles { profiles_dir } => {
            let profiles = load_profiles(profiles_dir.as_ref())?;
            for profile in profiles.iter() {
                println!(
                    "{:<14} sale_type={:<12} signature=[{}]",
                    profile.name,
                    profile
                        .sale_type
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into()),
                    profile.signature.join(", ")
                );
            }
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

fn load_profiles(dir: Option<&PathBuf>) -> Result<ProfileRegistry> {
    let mut profiles = ProfileRegistry::builtin();
    if let Some(dir) = dir {
        let loaded = profiles
            .load_dir(dir)
            .with_context(|| format!("Failed to load profiles from {}", dir.display()))?;
        tracing::info!(loaded, dir = %dir.display(), "Loaded format profiles");
    }
    Ok(profiles)
}

/// Rendered-strategy collaborator selected at startup.
#[derive(Clone)]
enum PageRenderer {
    Static(StaticPageRenderer),
    #[cfg(feature = "browser")]
    Browser(taxsale_client::BrowserRenderer),
}

impl Renderer for PageRenderer {
    async fn render_and_extract(&self, location: &str) -> Result<String, AppError> {
        match self {
            PageRenderer::Static(r) => r.render_and_extract(location).await,
            #[cfg(feature = "browser")]
            PageRenderer::Browser(r) => r.render_and_extract(location).await,
        }
    }
}

type Orchestrator<P, T> = ExtractionOrchestrator<
    TextLayerReader,
    PageRenderer,
    Option<ScriptRunner>,
    Option<VisionAssistant>,
    P,
    T,
>;

async fn build_orchestrator<P: PropertyStore + 'static, T: JobTracker + 'static>(
    args: &StrategyArgs,
    store: P,
    tracker: T,
) -> Result<Orchestrator<P, T>> {
    let fetcher = DocumentFetcher::new()
        .context("Failed to create HTTP client")?
        .allow_private_urls();
    let attempt_timeout = Duration::from_secs(args.attempt_timeout_secs);

    let renderer = PageRenderer::Static(StaticPageRenderer::new(fetcher.clone()));
    #[cfg(feature = "browser")]
    let renderer = if args.browser {
        let browser = taxsale_client::BrowserRenderer::with_timeout(attempt_timeout)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        PageRenderer::Browser(browser)
    } else {
        renderer
    };

    let custom = args
        .custom_command
        .as_deref()
        .map(ScriptRunner::from_command_line)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?
        .map(|r| r.with_timeout(attempt_timeout));

    let assistant = args
        .assist_api_key
        .as_deref()
        .map(|key| {
            VisionAssistant::with_base_url(
                fetcher.clone(),
                key,
                &args.assist_model,
                &args.assist_base_url,
            )
        })
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    if custom.is_none() {
        tracing::info!("No custom extractor command; custom_profile strategy disabled");
    }
    if assistant.is_none() {
        tracing::info!("No assist API key; assisted strategy disabled");
    }

    let given_names = match &args.names_file {
        Some(path) => GivenNames::load(path)
            .with_context(|| format!("Failed to load given names from {}", path.display()))?,
        None => GivenNames::default(),
    };
    let profiles = load_profiles(args.profiles_dir.as_ref())?;

    Ok(ExtractionOrchestrator::new(
        TextLayerReader::new(fetcher),
        renderer,
        custom,
        assistant,
        store,
        tracker,
    )
    .with_profiles(Arc::new(profiles))
    .with_given_names(Arc::new(given_names))
    .with_attempt_timeout(attempt_timeout))
}

async fn cmd_run(
    db: &Database,
    config: PipelineConfig,
    strategies: &StrategyArgs,
    json: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(strategies, db.property_repo(), db.job_repo()).await?;
    let claims = db.claims().with_ttl(config.stale_job_ceiling());
    let runner = PipelineRunner::new(db.document_repo(), claims, orchestrator, config);

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing documents in progress");
            ctrl_c_token.cancel();
        }
    });

    let report = runner
        .run(cancel_token, &TracingPipelineReporter)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn cmd_extract(
    db: &Database,
    new_document: NewSourceDocument,
    strategies: &StrategyArgs,
) -> Result<()> {
    let registry = db.document_repo();
    let doc = registry
        .register_document(new_document)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let orchestrator = build_orchestrator(strategies, db.property_repo(), db.job_repo()).await?;
    let config = PipelineConfig::default()
        .with_worker_id("cli")
        .with_attempt_timeout(Duration::from_secs(strategies.attempt_timeout_secs));
    let claims = db.claims().with_ttl(config.stale_job_ceiling());
    let runner = PipelineRunner::new(registry, claims, orchestrator, config);

    let Some(outcome) = runner
        .process_document(&doc)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
    else {
        anyhow::bail!("Document {} is being processed by another worker", doc.id);
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.succeeded {
        anyhow::bail!("Every strategy failed for {}", doc.location);
    }
    Ok(())
}

async fn cmd_extract_dry_run(
    new_document: NewSourceDocument,
    strategies: &StrategyArgs,
    format: OutputFormat,
) -> Result<()> {
    let doc = new_document.into_document();
    let store = InMemoryStore::new();
    let orchestrator = build_orchestrator(strategies, store.clone(), InMemoryTracker::new()).await?;

    let outcome = orchestrator.process(&doc, "dry-run").await;
    tracing::info!(
        succeeded = outcome.succeeded,
        strategy = ?outcome.strategy,
        records = outcome.records_extracted,
        failed_rows = outcome.records_failed,
        "Dry run finished"
    );

    print_records(&store.records(), format)?;
    if !outcome.succeeded {
        anyhow::bail!("Every strategy failed for {}", doc.location);
    }
    Ok(())
}

async fn cmd_jobs(db: &Database, document: Option<Uuid>, limit: usize) -> Result<()> {
    let jobs = db
        .job_repo()
        .list_jobs(document, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if jobs.is_empty() {
        println!("No extraction jobs found");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "  {} {} {:<14} {:<9} records={:<4} failed={:<4} {}",
            job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            job.document_id,
            job.strategy.as_str(),
            job.status.as_str(),
            job.records_extracted,
            job.records_failed,
            job.error_class.map(|c| c.to_string()).unwrap_or_default(),
        );
    }
    println!("\nTotal: {} jobs", jobs.len());
    Ok(())
}

fn print_records(records: &[PropertyRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}
