//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use marketlore_core::{
    CrawlSummary, Orchestrator, ProgressReporter, Retriever, RunPhase, default_persona_context,
    generate_monthly_report, infer_category, seed_core_knowledge, should_use_rag, sync_sources,
};
use marketlore_providers::EmbeddingClient;
use marketlore_shared::{
    AppConfig, CrawlType, EmbeddingConfig, RetrievalConfig, database_path, init_config,
    load_config, load_config_from, year_month,
};
use marketlore_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// marketlore: a marketing knowledge base fed by blogs, sitemaps and social posts.
#[derive(Parser)]
#[command(
    name = "marketlore",
    version,
    about = "Crawl marketing sources, distill them into structured knowledge, and retrieve it for prompts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.marketlore/marketlore.toml).
    #[arg(long, global = true, env = "MARKETLORE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// What triggered a crawl run.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum CrawlKind {
    Daily,
    Weekly,
    Manual,
}

impl From<CrawlKind> for CrawlType {
    fn from(kind: CrawlKind) -> Self {
        match kind {
            CrawlKind::Daily => CrawlType::Daily,
            CrawlKind::Weekly => CrawlType::Weekly,
            CrawlKind::Manual => CrawlType::Manual,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl every enabled source and distill new articles into knowledge.
    Crawl {
        /// Run type recorded in crawl logs.
        #[arg(long = "type", value_enum, default_value = "manual")]
        crawl_type: CrawlKind,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate the monthly digest of newly added knowledge.
    Report {
        /// Month as YYYY-MM (defaults to the current month).
        #[arg(long)]
        month: Option<String>,
    },

    /// Retrieve prompt-ready knowledge for a query.
    Retrieve {
        /// The user's question.
        query: String,

        /// Restrict results to one category.
        #[arg(short, long)]
        category: Option<String>,

        /// Infer the category from the query when none is given.
        #[arg(long)]
        infer: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Insert or refresh the built-in core knowledge.
    Seed,

    /// Source registry management.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Show recent crawl logs.
    Logs {
        /// Only logs from this batch.
        #[arg(long)]
        batch: Option<String>,

        /// Maximum number of entries.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Source registry subcommands.
#[derive(Subcommand)]
pub(crate) enum SourcesAction {
    /// List registered sources.
    List,
    /// Insert or update sources from the config file.
    Sync,
    /// Enable a source.
    Enable { source_id: String },
    /// Disable a source.
    Disable { source_id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "marketlore=info",
        1 => "marketlore=debug",
        _ => "marketlore=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    match cli.command {
        Command::Crawl { crawl_type, json } => cmd_crawl(&config, crawl_type.into(), json).await,
        Command::Report { month } => cmd_report(&config, month).await,
        Command::Retrieve {
            query,
            category,
            infer,
            json,
        } => cmd_retrieve(&config, &query, category, infer, json).await,
        Command::Seed => cmd_seed(&config).await,
        Command::Sources { action } => match action {
            SourcesAction::List => cmd_sources_list(&config).await,
            SourcesAction::Sync => cmd_sources_sync(&config).await,
            SourcesAction::Enable { source_id } => cmd_sources_toggle(&config, &source_id, true).await,
            SourcesAction::Disable { source_id } => {
                cmd_sources_toggle(&config, &source_id, false).await
            }
        },
        Command::Logs { batch, limit } => cmd_logs(&config, batch.as_deref(), limit).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    Ok(Storage::open(&path).await?)
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    Storage::open_readonly(&path)
        .await
        .map_err(|e| eyre!("{e}\nRun `marketlore sources sync` first to create the database."))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, phase: RunPhase) {
        self.spinner.set_message(phase.label());
    }

    fn source_crawled(&self, source_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Crawled [{current}/{total}] {source_id}"));
    }

    fn knowledge_stored(&self, knowledge_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Stored [{current}/{total}] {knowledge_id}"));
    }

    fn done(&self, _summary: &CrawlSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(config: &AppConfig, crawl_type: CrawlType, json: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    if storage.list_sources().await?.is_empty() {
        let synced = sync_sources(&storage, config).await?;
        info!(inserted = synced.inserted, "registry was empty, synced sources from config");
    }

    let orchestrator = Orchestrator::from_config(&storage, config)?;
    info!(crawl_type = crawl_type.as_str(), "starting crawl");

    let reporter = CliProgress::new();
    let summary = orchestrator.run_full_crawl(crawl_type, &reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("  Crawl complete ({})", summary.crawl_type.as_str());
    println!("  Batch:      {}", summary.batch_id);
    println!(
        "  Sources:    {} ok, {} failed",
        summary.sources_succeeded, summary.sources_failed
    );
    println!("  Articles:   {} found, {} distilled", summary.articles_found, summary.articles_distilled);
    println!(
        "  Knowledge:  {} added, {} skipped",
        summary.knowledge_added, summary.knowledge_skipped
    );
    println!(
        "  Time:       {:.1}s",
        (summary.completed_at - summary.started_at).num_milliseconds() as f64 / 1000.0
    );
    if !summary.errors.is_empty() {
        println!("  Errors:");
        for e in &summary.errors {
            println!("    - {e}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_report(config: &AppConfig, month: Option<String>) -> Result<()> {
    let month = month.unwrap_or_else(|| year_month(&Utc::now()));
    let storage = open_storage(config).await?;
    let report = generate_monthly_report(&storage, &month).await?;

    println!();
    println!("  Monthly report {}", report.year_month);
    println!("  Knowledge added: {}", report.total_knowledge);
    for h in &report.highlights {
        println!();
        println!(
            "  [{}] {} ({} new)",
            h.importance.as_str(),
            h.category,
            h.count
        );
        for title in &h.titles {
            println!("    - {title}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_retrieve(
    config: &AppConfig,
    query: &str,
    category: Option<String>,
    infer: bool,
    json: bool,
) -> Result<()> {
    let category = match category {
        Some(c) => Some(c),
        None if infer => infer_category(query).map(str::to_string),
        None => None,
    };
    if !should_use_rag(query) {
        info!("query does not look marketing-related; retrieving anyway");
    }

    let storage = open_storage_readonly(config).await?;
    let embeddings = EmbeddingClient::from_config(&EmbeddingConfig::from(config));
    let retriever = Retriever::new(&storage, embeddings, RetrievalConfig::from(config));
    let context = retriever.retrieve(query, category.as_deref()).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else if context.is_empty() {
        println!("{}", default_persona_context());
    } else {
        println!("{}", context.formatted_context);
    }
    Ok(())
}

async fn cmd_seed(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let embeddings = EmbeddingClient::from_config(&EmbeddingConfig::from(config));
    let written = seed_core_knowledge(&storage, &embeddings).await?;
    println!("Seeded {written} core knowledge records.");
    Ok(())
}

async fn cmd_sources_list(config: &AppConfig) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let sources = storage.list_sources().await?;
    if sources.is_empty() {
        println!("No sources registered. Run `marketlore sources sync`.");
        return Ok(());
    }
    for s in sources {
        let locator = s
            .feed_url
            .as_deref()
            .or(s.account_handle.as_deref())
            .unwrap_or("-");
        let last = s
            .last_crawled_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} {:<28} {:<17} {:<18} last: {:<16} {}",
            if s.enabled { "●" } else { "○" },
            s.source_id,
            s.source_type.as_str(),
            s.default_category,
            last,
            locator
        );
    }
    Ok(())
}

async fn cmd_sources_sync(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let summary = sync_sources(&storage, config).await?;
    println!(
        "Sources synced: {} inserted, {} updated.",
        summary.inserted, summary.updated
    );
    Ok(())
}

async fn cmd_sources_toggle(config: &AppConfig, source_id: &str, enabled: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    if !storage.set_source_enabled(source_id, enabled).await? {
        return Err(eyre!("unknown source '{source_id}'"));
    }
    println!(
        "Source {source_id} {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn cmd_logs(config: &AppConfig, batch: Option<&str>, limit: u32) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let logs = storage.list_crawl_logs(batch, limit).await?;
    for log in logs {
        println!(
            "{} {:<8} {:<28} {:<7} {:>4} articles {}",
            log.started_at.format("%Y-%m-%d %H:%M"),
            log.status.as_str(),
            log.source_id,
            log.crawl_type.as_str(),
            log.articles_fetched,
            log.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
