mod config;
mod db;
mod dedup;
mod errors;
mod export;
mod ingestion;
mod lookup;
mod maps;
mod pipeline;
mod progress;
mod results;
mod secrets;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{AppConfig, PublicAppConfig, DEFAULT_API_BASE_URL, MAX_ROUTE_BATCH_SIZE};
pub use db::{append_rows, count_rows, open as open_database, read_past_results};
pub use dedup::{dedup, Partition, PastResult};
pub use errors::{AppError, AppResult, FailureKind, ItemFailure, LookupError};
pub use export::{write_csv, DONE_FILE, ERRORS_FILE};
pub use ingestion::{
    assemble_address_queries, assemble_route_queries, assemble_segmented_queries, route_key,
    Address, RouteColumns, RoutePair, SegmentedAddress, WorkItem, WorkItemSet,
};
pub use lookup::{
    plan_batches, AddressGeocode, Centroid, LookupExecutor, Outcome, SegmentedGeocode, Strategy,
};
pub use maps::{BingMapsClient, Location, LocationQuery, MapsApi, RouteLeg, RouteMetrics};
pub use pipeline::{Destinations, Pipeline, RunRequest, RunSummary, Source};
pub use progress::create_progress_bar;
pub use results::{assemble, Failed, OutputRow, Resolution, Resolved};
pub use secrets::ApiKey;

/// Installs the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` selects debug output for
/// this crate and warnings only for everything else.
pub fn init_tracing(verbose: bool) {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let default = if verbose {
            "info,distance_extract=debug,maps_client=debug,lookup=debug,database=debug,pipeline=debug,secret_file=debug"
        } else {
            "warn"
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
