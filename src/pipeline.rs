//! One extraction run: read candidates, drop known ones, look up the rest,
//! then persist done and error rows.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::db;
use crate::dedup::{dedup, PastResult};
use crate::errors::AppResult;
use crate::export::{self, DONE_FILE, ERRORS_FILE};
use crate::ingestion::{
    assemble_address_queries, assemble_segmented_queries, read_address_csv, read_route_csv,
    read_segmented_csv, WorkItem, WorkItemSet,
};
use crate::lookup::{LookupExecutor, Outcome, Strategy};
use crate::maps::MapsApi;
use crate::progress::create_progress_bar;
use crate::results::{assemble, Failed, OutputRow, Resolution, Resolved};

/// Where the new candidates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A SELECT run against the results database.
    Query(String),
    Csv(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub done_table: String,
    pub error_table: String,
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub source: Source,
    /// Query yielding `KeyID` (and optionally the travel columns) of earlier results.
    pub past_query: Option<String>,
    pub destinations: Destinations,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: &'static str,
    pub started_at: DateTime<Utc>,
    pub candidates: usize,
    pub known: usize,
    pub pending: usize,
    pub done: usize,
    pub errors: usize,
    pub error_indexes: Vec<usize>,
    /// End-of-run lines for the operator.
    pub messages: Vec<String>,
}

pub struct Pipeline<'a> {
    connection: &'a mut Connection,
    api: &'a dyn MapsApi,
    batch_size: usize,
    show_progress: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        connection: &'a mut Connection,
        api: &'a dyn MapsApi,
        batch_size: usize,
        show_progress: bool,
    ) -> Self {
        Self {
            connection,
            api,
            batch_size,
            show_progress,
        }
    }

    pub async fn run_routes(
        &mut self,
        request: &RunRequest,
        strategy: Strategy,
    ) -> AppResult<RunSummary> {
        let started_at = Utc::now();
        validate_destinations(&request.destinations)?;
        let columns = match &request.source {
            Source::Query(query) => db::read_route_columns(self.connection, query)?,
            Source::Csv(path) => read_route_csv(path)?,
        };
        let candidates = columns.into_queries()?;
        let (pending, known, total) = self.split(candidates, request)?;
        info!(
            target: "pipeline",
            strategy = strategy.as_str(),
            batch_size = self.batch_size,
            pending = pending.len(),
            known,
            "starting route lookups"
        );

        let executor = self.executor(pending.len());
        let outcomes = executor.routes(&pending, strategy, self.batch_size).await;
        self.finish("routes", started_at, total, known, pending, outcomes, request)
    }

    pub async fn run_addresses(&mut self, request: &RunRequest) -> AppResult<RunSummary> {
        let started_at = Utc::now();
        validate_destinations(&request.destinations)?;
        let addresses = match &request.source {
            Source::Query(query) => db::read_addresses(self.connection, query)?,
            Source::Csv(path) => read_address_csv(path)?,
        };
        let (pending, known, total) = self.split(assemble_address_queries(addresses), request)?;
        info!(target: "pipeline", pending = pending.len(), known, "starting address lookups");

        let executor = self.executor(pending.len());
        let outcomes = executor.addresses(&pending).await;
        self.finish("addresses", started_at, total, known, pending, outcomes, request)
    }

    pub async fn run_segmented(&mut self, request: &RunRequest) -> AppResult<RunSummary> {
        let started_at = Utc::now();
        validate_destinations(&request.destinations)?;
        let rows = match &request.source {
            Source::Query(query) => db::read_segmented(self.connection, query)?,
            Source::Csv(path) => read_segmented_csv(path)?,
        };
        let (pending, known, total) = self.split(assemble_segmented_queries(rows), request)?;
        info!(target: "pipeline", pending = pending.len(), known, "starting segmented lookups");

        let executor = self.executor(pending.len());
        let outcomes = executor.segmented(&pending).await;
        self.finish("segmented", started_at, total, known, pending, outcomes, request)
    }

    fn executor(&self, total: usize) -> LookupExecutor<'a> {
        LookupExecutor::new(self.api, create_progress_bar(total, self.show_progress))
    }

    /// Returns `(pending, known count, candidate count)`.
    fn split<T: WorkItem>(
        &self,
        candidates: WorkItemSet<T>,
        request: &RunRequest,
    ) -> AppResult<(Vec<T>, usize, usize)> {
        let total = candidates.len();
        let past = self.read_past(request)?;
        let partition = dedup(candidates, &past);
        Ok((partition.pending, partition.known.len(), total))
    }

    fn read_past(&self, request: &RunRequest) -> AppResult<Vec<PastResult>> {
        match &request.past_query {
            Some(query) => db::read_past_results(&*self.connection, query),
            None => Ok(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish<T, R>(
        &mut self,
        mode: &'static str,
        started_at: DateTime<Utc>,
        candidates: usize,
        known: usize,
        pending: Vec<T>,
        outcomes: Vec<Outcome<R>>,
        request: &RunRequest,
    ) -> AppResult<RunSummary>
    where
        Resolved<T, R>: OutputRow,
        for<'r> Failed<'r, T>: OutputRow,
    {
        let pending_len = pending.len();
        let resolution = assemble(pending, outcomes)?;
        self.persist(&resolution, &request.destinations)?;

        let messages = resolution.summary_lines();
        if resolution.missing_field_count() > 0 {
            warn!(
                target: "pipeline",
                count = resolution.missing_field_count(),
                "responses without the expected fields"
            );
        }
        let summary = RunSummary {
            mode,
            started_at,
            candidates,
            known,
            pending: pending_len,
            done: resolution.done.len(),
            errors: resolution.errors.len(),
            error_indexes: resolution.error_indexes(),
            messages,
        };
        info!(
            target: "pipeline",
            mode,
            done = summary.done,
            errors = summary.errors,
            "run finished"
        );
        Ok(summary)
    }

    fn persist<T, R>(
        &mut self,
        resolution: &Resolution<T, R>,
        destinations: &Destinations,
    ) -> AppResult<()>
    where
        Resolved<T, R>: OutputRow,
        for<'r> Failed<'r, T>: OutputRow,
    {
        let failed = resolution.failed_rows();
        db::append_rows(self.connection, &destinations.done_table, &resolution.done)?;
        db::append_rows(self.connection, &destinations.error_table, &failed)?;
        if let Some(dir) = &destinations.export_dir {
            export::write_csv(dir, DONE_FILE, &resolution.done)?;
            export::write_csv(dir, ERRORS_FILE, &failed)?;
        }
        Ok(())
    }
}

fn validate_destinations(destinations: &Destinations) -> AppResult<()> {
    db::validate_identifier(&destinations.done_table)?;
    db::validate_identifier(&destinations.error_table)
}
