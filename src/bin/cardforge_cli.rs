//! Card Forge CLI
//!
//! Commands: ingest, clean, generate, templates
//! Outputs JSON (or one line per ingested row) to stdout; logs go to stderr.
//! Returns non-zero on any validation or I/O failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardforge_core::card::CardWire;
use cardforge_core::templates::{template_file_for, Template};
use cardforge_core::{
    emit, ingest, ArtSource, CardRecord, CardStore, CardType, Classify, ComposeOptions, Composer,
    CompositionPipeline, DbConfig, FileArtSource, LayoutSolver, PgCardStore, PlaceholderArtSource,
};

#[derive(Parser)]
#[command(name = "cardforge-cli")]
#[command(about = "Card Forge CLI - template-driven card renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates", global = true)]
    templates_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Import cards from a CSV file into the store
    Ingest {
        /// Card type for files without a Type column
        #[arg(long = "type")]
        card_type: Option<String>,

        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Env file with database settings
        #[arg(long, default_value = ".env")]
        env: PathBuf,

        /// Parse and validate only; nothing is written
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every card from the store
    Clean {
        /// Env file with database settings
        #[arg(long, default_value = ".env")]
        env: PathBuf,

        /// Required; without it nothing is deleted
        #[arg(long)]
        confirm: bool,
    },

    /// Render one card record (JSON) to <out>/<id>.svg and <out>/<id>.json
    Generate {
        /// Record file, or `-` for stdin
        #[arg(short, long)]
        record: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Directory with <card-id>.svg|png|jpg art; placeholder art when absent
        #[arg(long)]
        art_dir: Option<PathBuf>,

        /// Render placeholder art instead of failing when art is missing or late
        #[arg(long)]
        placeholder_art: bool,

        /// Art lookup deadline in seconds
        #[arg(long, default_value_t = 5)]
        art_timeout: u64,
    },

    /// Parse the variant templates and print their summaries
    Templates,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardforge_core=info,cardforge_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}

fn failure(kind: &str, message: impl std::fmt::Display) -> ExitCode {
    print_json(&json!({ "success": false, "kind": kind, "error": message.to_string() }));
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            card_type,
            file,
            env,
            dry_run,
        } => run_ingest(card_type.as_deref(), &file, &env, dry_run).await,
        Commands::Clean { env, confirm } => run_clean(&env, confirm).await,
        Commands::Generate {
            record,
            out,
            art_dir,
            placeholder_art,
            art_timeout,
        } => {
            let art: Arc<dyn ArtSource> = match art_dir {
                Some(dir) => Arc::new(FileArtSource::new(dir)),
                None => Arc::new(PlaceholderArtSource),
            };
            let options = ComposeOptions {
                art_deadline: Duration::from_secs(art_timeout),
                placeholder_on_art_failure: placeholder_art,
                ..ComposeOptions::default()
            };
            run_generate(&cli.templates_dir, &record, &out, art, options).await
        }
        Commands::Templates => run_templates(&cli.templates_dir),
    }
}

async fn run_ingest(card_type: Option<&str>, file: &Path, env: &Path, dry_run: bool) -> ExitCode {
    let fallback = match card_type.map(str::parse::<CardType>).transpose() {
        Ok(t) => t,
        Err(e) => return failure("validation", e),
    };

    let rows = match ingest::parse_file(file, fallback) {
        Ok(rows) => rows,
        Err(e) => return failure(e.kind().as_str(), e),
    };

    let store = if dry_run {
        None
    } else {
        match connect(env).await {
            Ok(store) => Some(store),
            Err(code) => return code,
        }
    };

    let mut failed = 0usize;
    for outcome in &rows {
        let line = match (&outcome.result, &store) {
            (Ok(record), Some(store)) => match store.save(record).await {
                Ok(saved) => format!(
                    "row {}: saved {} as {}",
                    outcome.row,
                    saved.name,
                    saved.id.as_deref().unwrap_or_default()
                ),
                Err(e) => {
                    failed += 1;
                    format!("row {}: failed: {e}", outcome.row)
                }
            },
            (Err(_), _) => {
                failed += 1;
                outcome.summary()
            }
            (Ok(_), None) => outcome.summary(),
        };
        println!("{line}");
    }

    info!(rows = rows.len(), failed, dry_run, "ingest finished");
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run_clean(env: &Path, confirm: bool) -> ExitCode {
    if !confirm {
        warn!("clean refused without --confirm");
        return failure("validation", "refusing to delete cards without --confirm");
    }
    let store = match connect(env).await {
        Ok(store) => store,
        Err(code) => return code,
    };
    match store.clean().await {
        Ok(removed) => {
            print_json(&json!({ "success": true, "removed": removed }));
            ExitCode::SUCCESS
        }
        Err(e) => failure(e.kind().as_str(), e),
    }
}

async fn connect(env: &Path) -> Result<PgCardStore, ExitCode> {
    let config = DbConfig::load(Some(env)).map_err(|e| failure(e.kind().as_str(), &e))?;
    let store = PgCardStore::connect(&config)
        .await
        .map_err(|e| failure(e.kind().as_str(), &e))?;
    store.migrate().await.map_err(|e| failure(e.kind().as_str(), &e))?;
    store.seed().await.map_err(|e| failure(e.kind().as_str(), &e))?;
    Ok(store)
}

fn read_record(path: &Path) -> Result<CardRecord, ExitCode> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(path)
    }
    .map_err(|e| failure("io", format!("failed to read {}: {e}", path.display())))?;

    let wire: CardWire = serde_json::from_str(&text)
        .map_err(|e| failure("validation", format!("invalid record: {e}")))?;
    CardRecord::from_wire_strict(wire).map_err(|e| failure(e.kind().as_str(), &e))
}

async fn run_generate(
    templates_dir: &Path,
    record_path: &Path,
    out: &Path,
    art: Arc<dyn ArtSource>,
    options: ComposeOptions,
) -> ExitCode {
    let record = match read_record(record_path) {
        Ok(record) => record,
        Err(code) => return code,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let pipeline = CompositionPipeline::new(templates_dir, art)
        .with_composer(Composer::new(LayoutSolver::default(), options));
    let composed =
        tokio::task::spawn_blocking(move || pipeline.compose_card(&record, &cancel)).await;

    let card = match composed {
        Ok(Ok(card)) => card,
        Ok(Err(e)) => {
            error!(error = %e, kind = %e.kind(), "composition failed");
            return failure(e.kind().as_str(), e);
        }
        Err(e) => return failure("io", format!("composition task failed: {e}")),
    };

    match emit(&card, out) {
        Ok(report) => {
            print_json(&json!({
                "success": true,
                "report": report,
                "overflow": card.has_overflow(),
            }));
            ExitCode::SUCCESS
        }
        Err(e) => failure(e.kind().as_str(), e),
    }
}

fn run_templates(templates_dir: &Path) -> ExitCode {
    let mut summaries = Vec::new();
    let mut ok = true;
    let mut seen = Vec::new();
    for card_type in CardType::ALL {
        let file = template_file_for(card_type);
        if seen.contains(&file) {
            continue;
        }
        seen.push(file);
        match Template::load(&templates_dir.join(file)) {
            Ok(t) => summaries.push(json!({ "file": file, "template": t.summary() })),
            Err(e) => {
                ok = false;
                summaries.push(json!({ "file": file, "error": e.to_string(), "kind": e.kind().as_str() }));
            }
        }
    }
    print_json(&Value::Array(summaries));
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
