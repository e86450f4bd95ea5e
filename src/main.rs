use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use distance_extract::{
    init_tracing, open_database, ApiKey, AppConfig, BingMapsClient, Destinations, Pipeline,
    RunRequest, RunSummary, Source, Strategy,
};
use tracing::{debug, info};

/// Driving distances and geocodes from the Bing Maps REST API, skipping
/// anything already stored in the results database.
#[derive(Parser)]
#[command(name = "distance-extract", version)]
struct Cli {
    /// SQLite database holding input and output tables (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// File containing the API key (overrides MAPS_API_KEY_FILE)
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// API root (overrides MAPS_API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide the progress bar
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Travel duration and distance for source/destination pairs
    Routes {
        #[command(flatten)]
        io: RunArgs,

        /// batched, single or batched-then-single
        #[arg(long, default_value = "batched")]
        strategy: Strategy,

        /// Pairs per request, at most 12 (overrides ROUTE_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Coordinates for free-form addresses
    Addresses {
        #[command(flatten)]
        io: RunArgs,
    },
    /// Coordinates for five-field addresses
    Segmented {
        #[command(flatten)]
        io: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// SELECT producing the new candidates
    #[arg(long, conflicts_with = "input_csv", required_unless_present = "input_csv")]
    new_query: Option<String>,

    /// CSV file with the new candidates, instead of --new-query
    #[arg(long)]
    input_csv: Option<PathBuf>,

    /// SELECT producing earlier results with a KeyID column
    #[arg(long)]
    past_query: Option<String>,

    /// Table that receives resolved rows
    #[arg(long)]
    done_table: String,

    /// Table that receives failed rows
    #[arg(long)]
    error_table: String,

    /// Also write done.csv and errors.csv into this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,
}

impl RunArgs {
    fn into_request(self) -> Result<RunRequest> {
        let source = match (self.new_query, self.input_csv) {
            (Some(query), None) => Source::Query(query),
            (None, Some(path)) => Source::Csv(path),
            _ => bail!("exactly one of --new-query or --input-csv is required"),
        };
        Ok(RunRequest {
            source,
            past_query: self.past_query,
            destinations: Destinations {
                done_table: self.done_table,
                error_table: self.error_table,
                export_dir: self.export_dir,
            },
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let started = Instant::now();

    let mut config = AppConfig::from_env();
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(key_file) = cli.key_file {
        config.api_key_file = key_file;
    }
    if let Some(base_url) = cli.base_url {
        config.api_base_url = base_url;
    }
    if let Command::Routes {
        batch_size: Some(size),
        ..
    } = &cli.command
    {
        config = config.with_batch_size(*size);
    }
    debug!(config = ?config.public_profile(), "configuration resolved");

    let api_key = ApiKey::from_file(&config.api_key_file)
        .with_context(|| format!("reading API key from {}", config.api_key_file.display()))?;
    let client = BingMapsClient::new(&config, api_key)?;
    let mut connection = open_database(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let mut pipeline = Pipeline::new(
        &mut connection,
        &client,
        config.route_batch_size,
        !cli.no_progress,
    );

    let summary = match cli.command {
        Command::Routes { io, strategy, .. } => {
            pipeline.run_routes(&io.into_request()?, strategy).await?
        }
        Command::Addresses { io } => pipeline.run_addresses(&io.into_request()?).await?,
        Command::Segmented { io } => pipeline.run_segmented(&io.into_request()?).await?,
    };
    report(&summary);

    info!(started_at = %summary.started_at, "run complete");
    println!("Elapsed: {:.2} s", started.elapsed().as_secs_f64());
    Ok(())
}

fn report(summary: &RunSummary) {
    println!(
        "{}: {} candidates, {} already known, {} looked up, {} done, {} errors",
        summary.mode,
        summary.candidates,
        summary.known,
        summary.pending,
        summary.done,
        summary.errors
    );
    for line in &summary.messages {
        println!("{line}");
    }
}
