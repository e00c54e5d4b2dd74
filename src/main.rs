use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use catalog_import::config::{self, Settings};
use catalog_import::{import_file, CatalogStore, EntityKind, ImportOptions};

#[derive(Debug, Parser)]
#[command(name = "catalog-import", version)]
#[command(about = "Load library holdings and student rosters into the catalog database")]
struct Cli {
    /// Database to load into (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Field delimiter of the input files (overrides IMPORT_DELIMITER)
    #[arg(long, global = true)]
    delimiter: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import library holdings (books)
    Holdings {
        /// Input file (overrides HOLDINGS_CSV)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Import enrolled students
    Students {
        /// Input file (overrides STUDENTS_CSV)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Import holdings, then students
    All,
    /// Show record counts and the last import of each kind
    Status,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut settings = Settings::from_lookup(|name| match name {
        config::DATABASE_URL if cli.database.is_some() => cli.database.clone(),
        config::IMPORT_DELIMITER if cli.delimiter.is_some() => cli.delimiter.clone(),
        _ => std::env::var(name).ok(),
    })
    .context("Invalid configuration")?;

    let kinds: Vec<EntityKind> = match &cli.command {
        Commands::Holdings { file } => {
            if let Some(path) = file {
                settings.set_path(EntityKind::Holding, path);
            }
            vec![EntityKind::Holding]
        }
        Commands::Students { file } => {
            if let Some(path) = file {
                settings.set_path(EntityKind::Individual, path);
            }
            vec![EntityKind::Individual]
        }
        Commands::All => EntityKind::ALL.to_vec(),
        Commands::Status => Vec::new(),
    };

    let mut store = CatalogStore::open(&settings.database_url)
        .with_context(|| format!("Failed to open database {}", settings.database_url))?;

    if matches!(cli.command, Commands::Status) {
        return print_status(&store);
    }

    let options = ImportOptions {
        delimiter: settings.delimiter,
    };

    for kind in kinds {
        let path = settings.path_for(kind);
        let summary = import_file(&mut store, kind, &path, options)
            .with_context(|| format!("Error while loading {} from {}", kind, path.display()))?;
        println!("{}", summary);
    }

    Ok(())
}

fn print_status(store: &CatalogStore) -> Result<()> {
    for kind in EntityKind::ALL {
        let count = store.count(kind.profile())?;
        match store.latest_run(kind)? {
            Some(run) => println!(
                "{}: {} records (last import {} from {}: Inserted={}, Updated={}, Skipped={})",
                kind,
                count,
                run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                run.source_path,
                run.created,
                run.updated,
                run.skipped
            ),
            None => println!("{}: {} records (never imported)", kind, count),
        }
    }

    Ok(())
}
