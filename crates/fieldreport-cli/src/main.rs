use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use fieldreport_common::telemetry::{self, TelemetryConfig};
use fieldreport_common::{Config, DirectoryEntry, EnvToken, HttpClient, InMemoryDirectory};
use fieldreport_composer::{
    Composer, DraftCheck, DraftStore, RawFile, Reconciler, SqliteStore,
    StagedImageId, StagedMediaStore, SubmitPhase, find_store,
};
use miette::{IntoDiagnostic, Result, WrapErr};

mod report;

use report::ReportFile;

type CliComposer = Composer<SqliteStore, Arc<SqliteStore>>;

#[derive(Parser)]
#[command(version, about = "fieldreport - compose and submit field reports offline", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, env = "FIELDREPORT_CONFIG", default_value = "fieldreport.toml")]
    config: PathBuf,

    /// Override the API endpoint from the configuration
    #[arg(long, env = "FIELDREPORT_ENDPOINT")]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize photos and keep them in the local stock
    Stage {
        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Inspect or prune the local photo stock
    Stock {
        #[command(subcommand)]
        command: StockCommand,
    },
    /// Inspect or discard the saved draft
    Draft {
        #[command(subcommand)]
        command: DraftCommand,
    },
    /// Compose a report and send it
    Submit {
        /// JSON report description; restores the saved draft when omitted
        report: Option<PathBuf>,

        /// JSON array of stores (`{id, name, ...}`) used to fill the header
        #[arg(long)]
        stores: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum StockCommand {
    /// List staged photos
    List,
    /// Remove one staged photo
    Remove { id: String },
    /// Remove every staged photo
    Clear,
}

#[derive(Subcommand)]
enum DraftCommand {
    /// Print the saved draft, if it is still fresh
    Show,
    /// Delete the saved draft
    Discard,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette()?;
    telemetry::init(TelemetryConfig::from_env("fieldreport-cli"));

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(endpoint) = cli.endpoint {
        config.api.endpoint = endpoint;
    }

    let store = Arc::new(
        SqliteStore::open(&config.storage.db_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("opening {}", config.storage.db_path))?,
    );
    let media = StagedMediaStore::from_shared(store.clone(), &config.composer);

    match cli.command {
        Commands::Stage { files } => stage(&media, files).await,
        Commands::Stock { command } => stock(&media, command),
        Commands::Draft { command } => {
            let composer = Composer::new(media, store, config.composer.clone());
            draft(&composer, command)
        }
        Commands::Submit { report, stores } => {
            let mut composer = Composer::new(media, store, config.composer.clone());
            submit(&mut composer, &config, report, stores).await
        }
    }
}

async fn stage(media: &StagedMediaStore<SqliteStore>, paths: Vec<PathBuf>) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        files.push(RawFile::new(report::file_name(&path), bytes));
    }

    let report = media
        .stage_batch(files, |p| println!("staged {}/{}", p.done, p.total))
        .await;
    for image in &report.staged {
        println!("{}  {}", image.id, image.original_name);
    }
    for err in &report.failed {
        eprintln!("skipped: {err}");
    }
    if report.staged.is_empty() && !report.failed.is_empty() {
        return Err(miette::miette!("no file could be staged"));
    }
    Ok(())
}

fn stock(media: &StagedMediaStore<SqliteStore>, command: StockCommand) -> Result<()> {
    match command {
        StockCommand::List => {
            let images = media.list_all().into_diagnostic()?;
            if images.is_empty() {
                println!("stock is empty");
            }
            for image in images {
                let state = image.uploaded_url().unwrap_or("staged");
                println!(
                    "{}  {:>8} B  {}  {}  {}",
                    image.id,
                    image.bytes.len(),
                    image.created_at.format("%Y-%m-%d %H:%M"),
                    image.original_name,
                    state
                );
            }
        }
        StockCommand::Remove { id } => {
            let id = StagedImageId::parse(&id)
                .ok_or_else(|| miette::miette!("not a staged image id: {id}"))?;
            if !media.remove(id).into_diagnostic()? {
                return Err(miette::miette!("no staged image {id}"));
            }
            println!("removed {id}");
        }
        StockCommand::Clear => {
            media.clear_all().into_diagnostic()?;
            println!("stock cleared");
        }
    }
    Ok(())
}

fn draft(composer: &CliComposer, command: DraftCommand) -> Result<()> {
    match command {
        DraftCommand::Show => match composer.check_draft(Utc::now()).into_diagnostic()? {
            DraftCheck::Offer(snapshot) => {
                let json = serde_json::to_string_pretty(&snapshot).into_diagnostic()?;
                println!("{json}");
            }
            DraftCheck::Empty => println!("no draft"),
            DraftCheck::DiscardedStale => println!("draft was stale and has been discarded"),
            DraftCheck::DiscardedCorrupt => println!("draft was unreadable and has been discarded"),
        },
        DraftCommand::Discard => {
            DraftStore::clear(composer.drafts()).into_diagnostic()?;
            println!("draft discarded");
        }
    }
    Ok(())
}

async fn submit(
    composer: &mut CliComposer,
    config: &Config,
    report: Option<PathBuf>,
    stores: Option<PathBuf>,
) -> Result<()> {
    match report {
        Some(path) => {
            let file = ReportFile::load(&path)?;
            let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
            let store_id = file.store.clone();
            let remote_id = file.remote_id.clone();
            file.apply(composer, &base_dir)?;
            if let Some(remote_id) = remote_id {
                composer.set_remote_id(remote_id);
            }
            if let Some(store_id) = store_id {
                let directory = load_directory(stores.as_deref())?;
                let entry = find_store(&directory, &store_id).await?;
                composer.apply_store_entry(&entry);
            }
        }
        None => match composer.check_draft(Utc::now()).into_diagnostic()? {
            DraftCheck::Offer(snapshot) => {
                let restored = composer.restore(*snapshot);
                for detached in &restored.detached_photos {
                    eprintln!(
                        "section {} had {} photo(s) that must be attached again",
                        detached.section, detached.count
                    );
                }
            }
            _ => return Err(miette::miette!("no report given and no fresh draft to resume")),
        },
    }

    // keep a draft in case the submit does not go through
    composer.flush_draft().into_diagnostic()?;

    let http = HttpClient::new(&config.api).into_diagnostic()?;
    let tokens = EnvToken::new(&config.api.token_env);
    let reconciler = Reconciler::new(&http, &http, &tokens, config.composer.upload_batch_size);

    let mut phases = reconciler.subscribe();
    let progress = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            match phase {
                SubmitPhase::Uploading { done, total } if total > 0 => {
                    eprintln!("uploading photos {done}/{total}")
                }
                SubmitPhase::Validating | SubmitPhase::Assembling => {
                    tracing::debug!(?phase, "submit phase")
                }
                _ => {}
            }
        }
    });

    let result = composer.submit(&reconciler).await;
    drop(reconciler);
    let _ = progress.await;

    let report = match result {
        Ok(report) => report,
        Err(err) if err.is_transient() => {
            eprintln!("the service is unreachable right now; the draft is saved, submit again later");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    for failure in &report.failed {
        eprintln!("warning: {failure}");
    }
    println!(
        "{} report {} ({} uploaded, {} reused, {} dropped)",
        if report.created { "created" } else { "updated" },
        report.remote_id,
        report.uploaded,
        report.reused,
        report.failed.len()
    );
    Ok(())
}

fn load_directory(path: Option<&Path>) -> Result<InMemoryDirectory> {
    let Some(path) = path else {
        return Err(miette::miette!(
            help = "pass --stores <file> with the store directory",
            "the report names a store but no directory was given"
        ));
    };
    let raw = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    let entries: Vec<DirectoryEntry> = serde_json::from_str(&raw).into_diagnostic()?;
    Ok(InMemoryDirectory::new(entries))
}

fn init_miette() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    miette::set_panic_hook();
    Ok(())
}
