//! ragsync: keep a local catalog in step with a Gemini File Search store
//!
//! Commands:
//!   create                 - create a remote store and register it locally
//!   upload <dirs...>       - upload new and changed files
//!   query <question...>    - ask a question grounded in the store
//!   list                   - list cached files, remote documents, or stores
//!   delete                 - delete by pattern, by document id, or the whole store
//!   status                 - compare cached checksums against disk
//!   sync                   - drop orphaned records, repair stale ids
//!   fetch                  - import remote document metadata into the catalog
//!   clean                  - delete remote documents whose local file is gone
//!   config show            - print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use secrecy::SecretString;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ragsync_core::config::{expand_tilde, RagsyncConfig};
use ragsync_core::types::StoreRecord;
use ragsync_core::RagsyncError;
use ragsync_remote::types::{short_store_id, store_id};
use ragsync_remote::{GeminiClient, PollConfig, QueryRequest, RemoteGateway, ResolvedStore};
use ragsync_sync::pipeline::{
    check_catalog_primed, FileResult, FileStatus, ProgressFn, UploadPipeline,
};
use ragsync_sync::reconcile::{self, FetchOptions, FileState, ReconcileReport};
use ragsync_sync::{discover_files, Catalog, ExcludeSet};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ragsync",
    version,
    about = "Sync local files into a Gemini File Search store",
    long_about = "ragsync: upload only what changed, query with grounding, \
                  and reconcile the local catalog with the remote store"
)]
struct Cli {
    /// Path to ragsync config.toml
    #[arg(
        long,
        env = "RAGSYNC_CONFIG",
        default_value = "~/.config/ragsync/config.toml",
        global = true
    )]
    config: PathBuf,

    /// Gemini API key
    #[arg(long, short = 'k', env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Store name: display name or store id
    #[arg(long, short = 's', env = "RAGSYNC_STORE", default_value = "default", global = true)]
    store: String,

    /// Catalog file (overrides config catalog.path)
    #[arg(long, short = 'd', env = "RAGSYNC_DATA_FILE", global = true)]
    data_file: Option<PathBuf>,

    /// Parallel uploads (overrides config upload.parallelism)
    #[arg(long, short = 'p', global = true)]
    parallelism: Option<usize>,

    /// Log level (trace, debug, info, warn, error); overrides config log.level
    #[arg(long, env = "RAGSYNC_LOG", global = true)]
    log_level: Option<String>,

    /// Log format; overrides config log.format
    #[arg(long, env = "RAGSYNC_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a remote store (display name defaults to --store)
    Create {
        display_name: Option<String>,
    },

    /// Upload files from one or more directories
    ///
    /// Files whose checksum matches the catalog are skipped. Changed files
    /// replace their previous remote document.
    Upload {
        /// Directories (or single files) to upload
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Regex matched against full paths; matching directories are not descended
        #[arg(long, short = 'e')]
        exclude: Vec<String>,
        /// List the files that would be uploaded and stop
        #[arg(long)]
        dry_run: bool,
        /// Create the remote store if it does not exist
        #[arg(long)]
        create: bool,
    },

    /// Ask a question answered from the store's documents
    Query {
        #[arg(required = true)]
        question: Vec<String>,
        /// Generation model (overrides config query.model)
        #[arg(long, short = 'm')]
        model: Option<String>,
        /// Metadata filter, e.g. 'author="kim"'
        #[arg(long)]
        filter: Option<String>,
        /// Print grounding citations
        #[arg(long)]
        citations: bool,
        /// Query several stores (comma-separated) instead of --store
        #[arg(long, value_delimiter = ',')]
        stores: Vec<String>,
    },

    /// List cached files (default), remote documents, or remote stores
    List {
        /// Regex filter on paths / display names
        #[arg(long, short = 'P')]
        pattern: Option<String>,
        /// Detailed table
        #[arg(long, short = 'l')]
        long: bool,
        /// List remote stores instead of files
        #[arg(long)]
        stores: bool,
        /// List remote documents instead of the local catalog
        #[arg(long)]
        remote: bool,
    },

    /// Delete documents by pattern or id, or the whole store
    Delete {
        /// Regex over cached local paths
        #[arg(long, short = 'P')]
        pattern: Option<String>,
        /// Document id, full or short (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Delete the remote store and all its documents
        #[arg(long)]
        all: bool,
        /// Do not ask for confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Compare cached checksums against the files on disk
    Status,

    /// Drop orphaned catalog records and repair stale document ids
    Sync,

    /// Import remote document metadata into the local catalog
    Fetch {
        /// Overwrite records even when disk and remote checksums disagree
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Delete remote documents whose local file no longer exists
    Clean {
        /// Do not ask for confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults merged with the config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let mut config = RagsyncConfig::load(&config_path)?;
    if let Some(p) = cli.parallelism {
        config.upload.parallelism = p;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormat::Json => "json".into(),
            LogFormat::Text => "text".into(),
        };
    }
    config.validate()?;
    init_logging(&config.log.level, &config.log.format);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; letting in-flight requests finish");
                cancel.cancel();
            }
        });
    }

    let session = Session {
        catalog_path: resolve_catalog_path(&config, cli.data_file.as_deref()),
        api_key: cli.api_key.filter(|k| !k.trim().is_empty()).map(SecretString::from),
        store: cli.store,
        config,
        cancel,
    };
    debug!(catalog = %session.catalog_path.display(), store = %session.store, "session ready");

    match cli.command {
        Commands::Create { display_name } => cmd_create(&session, display_name.as_deref()).await,
        Commands::Upload {
            dirs,
            exclude,
            dry_run,
            create,
        } => cmd_upload(&session, &dirs, &exclude, dry_run, create).await,
        Commands::Query {
            question,
            model,
            filter,
            citations,
            stores,
        } => cmd_query(&session, &question.join(" "), model, filter, citations, &stores).await,
        Commands::List {
            pattern,
            long,
            stores,
            remote,
        } => {
            if stores {
                cmd_list_stores(&session).await
            } else if remote {
                cmd_list_remote(&session, pattern.as_deref(), long).await
            } else {
                cmd_list_local(&session, pattern.as_deref(), long)
            }
        }
        Commands::Delete {
            pattern,
            ids,
            all,
            force,
        } => cmd_delete(&session, pattern.as_deref(), &ids, all, force).await,
        Commands::Status => cmd_status(&session),
        Commands::Sync => cmd_sync(&session).await,
        Commands::Fetch { force } => cmd_fetch(&session, force).await,
        Commands::Clean { force } => cmd_clean(&session, force).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&session.config, &config_path),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout is for command output; logs go to stderr
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Everything a command needs, built once from flags and config
struct Session {
    config: RagsyncConfig,
    store: String,
    catalog_path: PathBuf,
    api_key: Option<SecretString>,
    cancel: CancellationToken,
}

impl Session {
    /// Fails before any I/O when no API key was given
    fn gateway(&self) -> Result<Arc<dyn RemoteGateway>> {
        let key = self.api_key.clone().ok_or_else(|| {
            RagsyncError::Config(
                "Gemini API key not set: pass --api-key or export GEMINI_API_KEY".into(),
            )
        })?;
        let client = GeminiClient::new(&self.config.remote, key).context("building API client")?;
        Ok(Arc::new(client))
    }

    fn open_catalog(&self) -> Result<Arc<Catalog>> {
        let catalog = Catalog::open(&self.catalog_path)
            .with_context(|| format!("opening catalog: {}", self.catalog_path.display()))?;
        Ok(Arc::new(catalog))
    }

    fn poll(&self) -> PollConfig {
        PollConfig::from(&self.config.upload)
    }

    async fn resolve_store(&self, gateway: &dyn RemoteGateway) -> Result<ResolvedStore> {
        gateway
            .resolve_store(&self.store)
            .await
            .with_context(|| format!("store '{}' not found", self.store))
    }
}

/// Catalog path: `--data-file` > config > default
fn resolve_catalog_path(config: &RagsyncConfig, override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(p) => expand_tilde(p),
        None => expand_tilde(&config.catalog.path),
    }
}

/// Find a store in the catalog by short id, full id, or display name
fn find_local_store(catalog: &Catalog, name: &str) -> Result<StoreRecord> {
    catalog
        .find_store(short_store_id(name))
        .or_else(|| catalog.find_store(name))
        .with_context(|| {
            format!(
                "store '{name}' not found in the local catalog; \
                 run `ragsync fetch` or use --remote"
            )
        })
}

fn save_catalog(catalog: &Catalog) -> Result<()> {
    catalog
        .save()
        .with_context(|| format!("saving catalog: {}", catalog.path().display()))
}

// ── Terminal helpers ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// `[y/N]` prompt on stdin; anything but y/yes is a no
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush().context("flushing stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading confirmation")?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }
    let render = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", render(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", render(headers.iter().map(|h| "-".repeat(h.len())).collect()));
    for row in rows {
        println!("{}", render(row.clone()));
    }
}

fn print_reconcile_entries(report: &ReconcileReport) {
    for entry in &report.entries {
        println!("  {:<12} {}", entry.outcome.as_str(), entry.name);
        if let Some(msg) = &entry.message {
            println!("  {:<12}   {msg}", "");
        }
    }
}

// ── `ragsync create` ──────────────────────────────────────────────────────────

async fn cmd_create(session: &Session, display_name: Option<&str>) -> Result<()> {
    let gateway = session.gateway()?;
    let name = display_name.unwrap_or(&session.store);
    let catalog = session.open_catalog()?;

    let store = gateway
        .create_store(name)
        .await
        .with_context(|| format!("creating store '{name}'"))?;
    catalog.get_or_create_store(store.short_id());
    catalog.set_display_name(store.short_id(), &store.display_name);
    save_catalog(&catalog)?;

    println!("Created store '{}'", store.display_name);
    println!("  id: {}", store.name);
    Ok(())
}

// ── `ragsync upload` ──────────────────────────────────────────────────────────

async fn cmd_upload(
    session: &Session,
    dirs: &[PathBuf],
    exclude: &[String],
    dry_run: bool,
    create: bool,
) -> Result<()> {
    let patterns: Vec<&str> = session
        .config
        .upload
        .exclude_patterns
        .iter()
        .chain(exclude)
        .map(String::as_str)
        .collect();
    let excludes = ExcludeSet::new(&patterns).map_err(|e| RagsyncError::Config(format!("{e:#}")))?;

    if dry_run {
        let files = discover_files(dirs, &excludes).context("discovering files")?;
        println!("Dry run: {} files would be considered for upload", files.len());
        for f in &files {
            println!("  {} ({})", f.path.display(), fmt_bytes(f.size));
        }
        return Ok(());
    }

    let gateway = session.gateway()?;
    let catalog = session.open_catalog()?;

    let (store, created) = match gateway.resolve_store(&session.store).await {
        Ok(store) => (store, false),
        Err(e) if e.is_not_found() && create => {
            println!("Creating store '{}'...", session.store);
            let store = gateway
                .create_store(&session.store)
                .await
                .with_context(|| format!("creating store '{}'", session.store))?;
            println!("Created store: {}", store.name);
            (ResolvedStore::new(store), true)
        }
        Err(e) if e.is_not_found() => {
            bail!(
                "store '{}' not found; pass --create to create it, or run `ragsync create`",
                session.store
            )
        }
        Err(e) => return Err(e).with_context(|| format!("resolving store '{}'", session.store)),
    };

    if !created {
        check_catalog_primed(gateway.as_ref(), &catalog, &store).await?;
    }
    catalog.get_or_create_store(store.key());
    catalog.set_display_name(store.key(), &store.store.display_name);

    let files = discover_files(dirs, &excludes).context("discovering files")?;
    if files.is_empty() {
        println!("No files to upload");
        return save_catalog(&catalog);
    }

    let pipeline = UploadPipeline::new(
        gateway.clone(),
        catalog.clone(),
        session.config.upload.effective_parallelism(),
    )
    .with_poll(session.poll())
    .with_cancel(session.cancel.clone());

    println!(
        "Uploading {} files to '{}' ({}) with {} workers",
        files.len(),
        store.store.display_name,
        store.id,
        pipeline.parallelism()
    );

    let pb = make_progress_bar(files.len() as u64, "upload");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Arc::new(move |r: &FileResult| {
        pb_clone.inc(1);
        match r.status {
            FileStatus::Uploaded => pb_clone.println(format!("  uploaded  {}", r.path.display())),
            FileStatus::Skipped => pb_clone.println(format!("  unchanged {}", r.path.display())),
            FileStatus::Failed => pb_clone.println(format!(
                "  FAILED    {}: {}",
                r.path.display(),
                r.error.as_deref().unwrap_or("unknown error")
            )),
        }
    });

    let report = pipeline.run(&store, files, Some(progress)).await;
    pb.finish_and_clear();
    save_catalog(&catalog)?;

    let bytes: u64 = report
        .results
        .iter()
        .filter(|r| r.status == FileStatus::Uploaded)
        .map(|r| r.size)
        .sum();
    println!();
    println!("Upload complete:");
    println!("  uploaded: {} files ({})", report.uploaded, fmt_bytes(bytes));
    println!("  skipped:  {} files (unchanged)", report.skipped);
    println!("  failed:   {} files", report.failed);

    let warnings: Vec<_> = report.warnings().collect();
    if !warnings.is_empty() {
        println!("Warnings:");
        for (path, w) in warnings {
            println!("  {}: {w}", path.display());
        }
    }

    if report.has_failures() {
        bail!("{} of {} uploads failed", report.failed, report.results.len());
    }
    Ok(())
}

// ── `ragsync query` ───────────────────────────────────────────────────────────

async fn cmd_query(
    session: &Session,
    question: &str,
    model: Option<String>,
    filter: Option<String>,
    citations: bool,
    stores: &[String],
) -> Result<()> {
    let gateway = session.gateway()?;

    let names: Vec<&str> = if stores.is_empty() {
        vec![session.store.as_str()]
    } else {
        stores.iter().map(String::as_str).collect()
    };
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        let store = gateway
            .resolve_store(name)
            .await
            .with_context(|| format!("store '{name}' not found"))?;
        resolved.push(store);
    }

    let display: Vec<&str> = resolved.iter().map(|s| s.store.display_name.as_str()).collect();
    let spinner = make_spinner("query");
    spinner.set_message(format!("asking {}...", display.join(", ")));

    let request = QueryRequest {
        model: model.unwrap_or_else(|| session.config.query.model.clone()),
        question: question.to_string(),
        stores: resolved.iter().map(|s| s.id.clone()).collect(),
        metadata_filter: filter.filter(|f| !f.is_empty()),
    };
    let answer = gateway.query(&request).await;
    spinner.finish_and_clear();
    let answer = answer.context("query failed")?;

    if answer.text.is_empty() {
        println!("No response generated");
    } else {
        println!("{}", answer.text);
    }

    if citations && !answer.citations.is_empty() {
        println!();
        println!("--- Citations ---");
        for (i, c) in answer.citations.iter().enumerate() {
            println!();
            println!("[{}] {}", i + 1, c.title);
            if !c.uri.is_empty() {
                println!("    URI: {}", c.uri);
            }
            if !c.text.is_empty() {
                println!("    Text: {}", truncate(&c.text, 200));
            }
        }
    }
    Ok(())
}

/// First `max` characters, with `...` appended when cut
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ── `ragsync list` ────────────────────────────────────────────────────────────

async fn cmd_list_stores(session: &Session) -> Result<()> {
    let gateway = session.gateway()?;
    let stores = gateway.list_stores().await.context("listing stores")?;
    if stores.is_empty() {
        println!("No stores found");
        return Ok(());
    }
    println!("Stores ({}):", stores.len());
    println!();
    let rows: Vec<Vec<String>> = stores
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.display_name.clone(),
                s.create_time.clone(),
                s.update_time.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "DISPLAY NAME", "CREATED", "UPDATED"], &rows);
    Ok(())
}

async fn cmd_list_remote(session: &Session, pattern: Option<&str>, long: bool) -> Result<()> {
    let re = pattern
        .map(regex_for)
        .transpose()
        .map_err(|e| RagsyncError::Config(format!("{e:#}")))?;
    let gateway = session.gateway()?;
    let store = session.resolve_store(gateway.as_ref()).await?;

    let mut docs = gateway
        .list_documents(&store.id)
        .await
        .with_context(|| format!("listing documents in {}", store.id))?;
    if let Some(re) = &re {
        docs.retain(|d| re.is_match(&d.display_name) || re.is_match(&d.name));
    }
    if docs.is_empty() {
        println!("No documents in '{}'", store.store.display_name);
        return Ok(());
    }
    docs.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    println!("Documents in '{}' ({} total):", store.store.display_name, docs.len());
    println!();
    if long {
        let rows: Vec<Vec<String>> = docs
            .iter()
            .map(|d| {
                vec![
                    d.display_name.clone(),
                    d.state.clone(),
                    fmt_bytes(d.size_bytes),
                    d.create_time.clone(),
                    d.name.clone(),
                ]
            })
            .collect();
        print_table(&["DISPLAY NAME", "STATE", "SIZE", "CREATED", "NAME"], &rows);
    } else {
        for d in &docs {
            println!("  {}", d.display_name);
        }
    }
    Ok(())
}

fn cmd_list_local(session: &Session, pattern: Option<&str>, long: bool) -> Result<()> {
    let re = pattern
        .map(regex_for)
        .transpose()
        .map_err(|e| RagsyncError::Config(format!("{e:#}")))?;
    let catalog = session.open_catalog()?;
    let store = find_local_store(&catalog, &session.store)?;

    let files: Vec<_> = store
        .files
        .values()
        .filter(|f| re.as_ref().map_or(true, |re| re.is_match(&f.local_path)))
        .collect();
    if files.is_empty() {
        println!("No files in '{}' (local catalog)", session.store);
        return Ok(());
    }

    println!("Files in '{}' ({} total, from local catalog):", session.store, files.len());
    println!();
    if long {
        let rows: Vec<Vec<String>> = files
            .iter()
            .map(|f| {
                vec![
                    f.local_path.clone(),
                    fmt_bytes(f.size),
                    checksum_prefix(&f.checksum),
                    f.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    f.remote_id.clone(),
                ]
            })
            .collect();
        print_table(&["PATH", "SIZE", "CHECKSUM", "UPLOADED", "REMOTE ID"], &rows);
    } else {
        for f in &files {
            println!("  {}", f.local_path);
        }
    }
    println!();
    println!("Store created: {}", store.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Last updated:  {}", store.updated_at.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

fn regex_for(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))
}

/// Hex digest shortened for tables, algorithm tag dropped
fn checksum_prefix(checksum: &str) -> String {
    let hex = checksum.split_once(':').map_or(checksum, |(_, h)| h);
    match hex.char_indices().nth(12) {
        Some((cut, _)) => format!("{}...", &hex[..cut]),
        None => hex.to_string(),
    }
}

// ── `ragsync delete` ──────────────────────────────────────────────────────────

async fn cmd_delete(
    session: &Session,
    pattern: Option<&str>,
    ids: &[String],
    all: bool,
    force: bool,
) -> Result<()> {
    if !all && ids.is_empty() && pattern.is_none() {
        return Err(RagsyncError::Config("specify --pattern, --id, or --all".into()).into());
    }
    let gateway = session.gateway()?;
    let catalog = session.open_catalog()?;

    if all {
        let store = session.resolve_store(gateway.as_ref()).await?;
        if !force
            && !confirm(&format!(
                "Delete store '{}' ({}) and all its documents?",
                store.store.display_name, store.id
            ))?
        {
            println!("Delete cancelled");
            return Ok(());
        }
        gateway
            .delete_store(&store.id, true)
            .await
            .with_context(|| format!("deleting store {}", store.id))?;
        catalog.delete_store(store.key());
        save_catalog(&catalog)?;
        println!("Store '{}' deleted", store.store.display_name);
        return Ok(());
    }

    let report = if !ids.is_empty() {
        // Deleting by id still works when the store itself can no longer be resolved
        let store = match gateway.resolve_store(&session.store).await {
            Ok(s) => s.id,
            Err(e) => {
                debug!("store resolution failed, using name as id: {e}");
                store_id(&session.store)
            }
        };
        let full = reconcile::expand_document_ids(&store, ids);
        println!("Documents to delete:");
        for id in &full {
            println!("  {id}");
        }
        println!("Total: {} documents", full.len());
        if !force && !confirm("Delete these documents?")? {
            println!("Delete cancelled");
            return Ok(());
        }
        reconcile::delete_by_ids(gateway.as_ref(), &catalog, &store, &full, &session.cancel).await
    } else {
        let pattern = pattern.unwrap_or_default();
        let local = find_local_store(&catalog, &session.store)?;
        let records = reconcile::records_matching(&catalog, &local.name, pattern)?;
        if records.is_empty() {
            println!("No files matching '{pattern}' in '{}'", session.store);
            return Ok(());
        }
        println!("Files to delete from '{}':", session.store);
        for r in &records {
            println!("  {}", r.local_path);
        }
        println!("Total: {} files", records.len());
        if !force && !confirm("Delete these files?")? {
            println!("Delete cancelled");
            return Ok(());
        }
        let cancel = &session.cancel;
        reconcile::delete_confirmed(gateway.as_ref(), &catalog, &local.name, records, cancel).await
    };

    save_catalog(&catalog)?;
    print_reconcile_entries(&report);
    println!();
    println!("Delete complete: {}", report.tally);
    if report.has_failures() {
        bail!("{} deletions failed", report.tally.failed);
    }
    Ok(())
}

// ── `ragsync status` ──────────────────────────────────────────────────────────

fn cmd_status(session: &Session) -> Result<()> {
    let catalog = session.open_catalog()?;
    let store = find_local_store(&catalog, &session.store)?;
    let report = reconcile::status(&catalog, &store.name);
    if report.total() == 0 {
        println!("No files in '{}'", session.store);
        return Ok(());
    }

    println!("Status of files in '{}':", session.store);
    println!();
    for entry in &report.entries {
        match &entry.state {
            FileState::Error(e) => println!("  [{}] {}: {e}", entry.state, entry.local_path),
            state => println!("  [{state}] {}", entry.local_path),
        }
    }
    println!();
    println!("Summary:");
    println!("  unchanged: {}", report.unchanged);
    println!("  modified:  {}", report.modified);
    println!("  missing:   {}", report.missing);
    if report.errors > 0 {
        println!("  errors:    {}", report.errors);
    }
    println!("  total:     {}", report.total());
    Ok(())
}

// ── `ragsync sync` ────────────────────────────────────────────────────────────

async fn cmd_sync(session: &Session) -> Result<()> {
    let gateway = session.gateway()?;
    let catalog = session.open_catalog()?;
    let store = session.resolve_store(gateway.as_ref()).await?;
    println!("Syncing with '{}' ({})...", store.store.display_name, store.id);

    let report = reconcile::sync(gateway.as_ref(), &catalog, &store, &session.cancel).await?;
    save_catalog(&catalog)?;

    for entry in report
        .reconcile
        .entries
        .iter()
        .filter(|e| e.outcome != reconcile::Outcome::Unchanged)
    {
        println!("  {:<12} {}", entry.outcome.as_str(), entry.name);
    }
    for path in &report.missing_on_disk {
        println!("  missing      {path}");
    }
    println!();
    println!("Sync complete:");
    println!("  remote documents:        {}", report.remote_documents);
    println!("  local entries:           {}", report.local_entries);
    println!("  removed orphaned entries: {}", report.reconcile.tally.removed);
    println!("  updated entries:         {}", report.reconcile.tally.updated);
    println!("  missing local files:     {}", report.missing_on_disk.len());
    Ok(())
}

// ── `ragsync fetch` ───────────────────────────────────────────────────────────

async fn cmd_fetch(session: &Session, force: bool) -> Result<()> {
    let gateway = session.gateway()?;
    let catalog = session.open_catalog()?;
    let store = session.resolve_store(gateway.as_ref()).await?;
    println!("Fetching from '{}' ({})...", store.store.display_name, store.id);

    let report = reconcile::fetch(
        gateway.as_ref(),
        &catalog,
        &store,
        FetchOptions { force },
        &session.cancel,
    )
    .await?;
    save_catalog(&catalog)?;

    if report.entries.is_empty() {
        println!("No documents found in remote store");
        return Ok(());
    }
    print_reconcile_entries(&report);
    let t = &report.tally;
    println!();
    println!("Fetch complete:");
    println!("  added:     {}", t.added);
    println!("  updated:   {}", t.updated);
    println!("  unchanged: {}", t.unchanged);
    println!("  not found: {}", t.not_found);
    if t.needs_upload > 0 {
        println!("  needs upload: {} (local file changed)", t.needs_upload);
    }
    if t.skipped > 0 {
        println!("  skipped:   {} (checksum mismatch)", t.skipped);
    }
    if t.failed > 0 {
        println!("  failed:    {}", t.failed);
    }
    println!("  total:     {}", t.total());

    if report.has_failures() {
        bail!("{} documents could not be reconciled", t.failed);
    }
    Ok(())
}

// ── `ragsync clean` ───────────────────────────────────────────────────────────

async fn cmd_clean(session: &Session, force: bool) -> Result<()> {
    let gateway = session.gateway()?;
    let catalog = session.open_catalog()?;
    let store = find_local_store(&catalog, &session.store)?;

    let scan = reconcile::scan_missing_on_disk(&catalog, &store.name);
    for (r, err) in &scan.unreadable {
        println!("  skipped  {}: {err}", r.local_path);
    }
    let missing = scan.missing;
    if missing.is_empty() {
        println!("No files to clean up");
        return Ok(());
    }
    println!("Found {} files to clean up:", missing.len());
    for r in &missing {
        println!("  {}", r.local_path);
    }
    if !force && !confirm("\nDelete these documents from the remote store?")? {
        println!("Clean cancelled");
        return Ok(());
    }

    let cancel = &session.cancel;
    let report =
        reconcile::delete_confirmed(gateway.as_ref(), &catalog, &store.name, missing, cancel).await;
    save_catalog(&catalog)?;

    print_reconcile_entries(&report);
    println!();
    println!("Clean complete:");
    println!("  deleted: {}", report.tally.deleted + report.tally.removed);
    println!("  failed:  {}", report.tally.failed);
    if report.has_failures() {
        bail!("{} deletions failed", report.tally.failed);
    }
    Ok(())
}

// ── `ragsync config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &RagsyncConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ragsync", "upload", "./docs", "-e", r"\.git", "-s", "research", "-p", "8",
        ])
        .unwrap();
        assert_eq!(cli.store, "research");
        assert_eq!(cli.parallelism, Some(8));
        match cli.command {
            Commands::Upload { dirs, exclude, dry_run, .. } => {
                assert_eq!(dirs, vec![PathBuf::from("./docs")]);
                assert_eq!(exclude, vec![r"\.git".to_string()]);
                assert!(!dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn query_stores_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "ragsync", "query", "--stores", "a,b", "how", "does", "auth", "work",
        ])
        .unwrap();
        match cli.command {
            Commands::Query { question, stores, .. } => {
                assert_eq!(stores, vec!["a", "b"]);
                assert_eq!(question.join(" "), "how does auth work");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delete_accepts_repeated_ids() {
        let args = ["ragsync", "delete", "--id", "d1", "--id", "d2", "-f"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Delete { ids, force, all, .. } => {
                assert_eq!(ids, vec!["d1", "d2"]);
                assert!(force);
                assert!(!all);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("short", 200), "short");
        assert_eq!(truncate("ééééé", 3), "ééé...");
    }

    #[test]
    fn checksum_prefix_drops_tag() {
        assert_eq!(
            checksum_prefix("sha256:0123456789abcdef0123"),
            "0123456789ab..."
        );
        assert_eq!(checksum_prefix("abc"), "abc");
        assert_eq!(checksum_prefix("0123456789ab"), "0123456789ab");
    }

    #[test]
    fn checksum_prefix_cuts_on_char_boundary() {
        // Catalogs are hand-editable; a non-hex checksum must not panic
        assert_eq!(checksum_prefix("sha256:aéééééééééééé"), "aééééééééééé...");
        assert_eq!(checksum_prefix("ééé"), "ééé");
    }

    #[test]
    fn fmt_bytes_units() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn catalog_path_prefers_flag() {
        let config = RagsyncConfig::default();
        assert_eq!(
            resolve_catalog_path(&config, Some(Path::new("/tmp/c.json"))),
            PathBuf::from("/tmp/c.json")
        );
        assert!(resolve_catalog_path(&config, None).ends_with(".ragsync.json"));
    }

    #[test]
    fn local_store_found_by_display_name_or_full_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("c.json")).unwrap();
        catalog.set_display_name("abc123", "research");
        assert_eq!(find_local_store(&catalog, "research").unwrap().name, "abc123");
        assert_eq!(
            find_local_store(&catalog, "fileSearchStores/abc123").unwrap().name,
            "abc123"
        );
        assert!(find_local_store(&catalog, "nope").is_err());
    }
}
