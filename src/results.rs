//! Turns per-item lookup outcomes into the done and error row sets.

use rusqlite::types::Value;

use crate::errors::{AppError, AppResult, FailureKind, ItemFailure};
use crate::ingestion::{Address, RoutePair, SegmentedAddress, WorkItem};
use crate::lookup::{AddressGeocode, Outcome, SegmentedGeocode};
use crate::maps::RouteMetrics;

const MISSING_FIELD_WARNING: &str =
    "Warning: some responses lacked the expected fields; those items were written to the error table";

/// A pending item together with what the lookup resolved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T, R> {
    pub item: T,
    pub result: R,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T, R> {
    pub done: Vec<Resolved<T, R>>,
    pub errors: Vec<T>,
    pub failures: Vec<ItemFailure>,
}

/// Splits `pending` by the outcome recorded at the same index, preserving order.
pub fn assemble<T, R>(pending: Vec<T>, outcomes: Vec<Outcome<R>>) -> AppResult<Resolution<T, R>> {
    if pending.len() != outcomes.len() {
        return Err(AppError::LengthMismatch {
            what: "pending item and lookup outcome",
            left: pending.len(),
            right: outcomes.len(),
        });
    }
    let mut resolution = Resolution {
        done: Vec::new(),
        errors: Vec::new(),
        failures: Vec::new(),
    };
    for (item, outcome) in pending.into_iter().zip(outcomes) {
        match outcome {
            Ok(result) => resolution.done.push(Resolved { item, result }),
            Err(failure) => {
                resolution.errors.push(item);
                resolution.failures.push(failure);
            }
        }
    }
    Ok(resolution)
}

impl<T, R> Resolution<T, R> {
    pub fn error_indexes(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.index).collect()
    }

    pub fn missing_field_count(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.kind == FailureKind::MissingField)
            .count()
    }

    /// Lines printed at the end of a run: failed indexes, then one warning at most.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.failures.is_empty() {
            let indexes: Vec<String> = self
                .error_indexes()
                .iter()
                .map(usize::to_string)
                .collect();
            lines.push(format!("Errors at indexes: {}", indexes.join(", ")));
        }
        if self.missing_field_count() > 0 {
            lines.push(MISSING_FIELD_WARNING.to_string());
        }
        lines
    }

    /// Error rows borrowed for writing.
    pub fn failed_rows(&self) -> Vec<Failed<'_, T>> {
        self.errors.iter().map(Failed).collect()
    }
}

/// A row shape written to an output table or CSV file.
pub trait OutputRow {
    /// `(column name, SQLite column type)` in output order.
    const COLUMNS: &'static [(&'static str, &'static str)];

    fn values(&self) -> Vec<Value>;
}

/// Error-table row for an item whose lookup failed.
#[derive(Debug, Clone, Copy)]
pub struct Failed<'a, T>(pub &'a T);

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

impl OutputRow for Resolved<RoutePair, RouteMetrics> {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("KeyID", "TEXT"),
        ("Source", "TEXT"),
        ("Destination", "TEXT"),
        ("TravelDuration", "REAL"),
        ("TravelDistance", "REAL"),
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.item.dedup_key()),
            text(&self.item.source),
            text(&self.item.destination),
            Value::Real(self.result.travel_duration),
            Value::Real(self.result.travel_distance),
        ]
    }
}

impl OutputRow for Failed<'_, RoutePair> {
    const COLUMNS: &'static [(&'static str, &'static str)] =
        &[("Source", "TEXT"), ("Destination", "TEXT")];

    fn values(&self) -> Vec<Value> {
        vec![text(&self.0.source), text(&self.0.destination)]
    }
}

impl OutputRow for Resolved<Address, AddressGeocode> {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("Address", "TEXT"),
        ("Latitude", "REAL"),
        ("Longitude", "REAL"),
        ("Country_check", "TEXT"),
        ("Country_check_latitude", "REAL"),
        ("Country_check_longitude", "REAL"),
        ("Confidence", "TEXT"),
    ];

    fn values(&self) -> Vec<Value> {
        let r = &self.result;
        vec![
            text(&self.item.address),
            Value::Real(r.latitude),
            Value::Real(r.longitude),
            text(&r.country_check),
            Value::Real(r.country_centroid.latitude),
            Value::Real(r.country_centroid.longitude),
            text(&r.confidence),
        ]
    }
}

impl OutputRow for Failed<'_, Address> {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[("Address", "TEXT")];

    fn values(&self) -> Vec<Value> {
        vec![text(&self.0.address)]
    }
}

impl OutputRow for Resolved<SegmentedAddress, SegmentedGeocode> {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("countryRegion", "TEXT"),
        ("adminDistrict", "TEXT"),
        ("locality", "TEXT"),
        ("postalCode", "TEXT"),
        ("addressLine", "TEXT"),
        ("Latitude", "REAL"),
        ("Longitude", "REAL"),
        ("Country_check", "TEXT"),
        ("Admdist_check", "TEXT"),
        ("Country_check_latitude", "REAL"),
        ("Country_check_longitude", "REAL"),
        ("Admdist_check_latitude", "REAL"),
        ("Admdist_check_longitude", "REAL"),
        ("Confidence", "TEXT"),
    ];

    fn values(&self) -> Vec<Value> {
        let (item, r) = (&self.item, &self.result);
        vec![
            text(&item.country_region),
            text(&item.admin_district),
            text(&item.locality),
            text(&item.postal_code),
            text(&item.address_line),
            Value::Real(r.latitude),
            Value::Real(r.longitude),
            text(&r.country_check),
            text(&r.admdist_check),
            Value::Real(r.country_centroid.latitude),
            Value::Real(r.country_centroid.longitude),
            Value::Real(r.admdist_centroid.latitude),
            Value::Real(r.admdist_centroid.longitude),
            text(&r.confidence),
        ]
    }
}

impl OutputRow for Failed<'_, SegmentedAddress> {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[("Address", "TEXT")];

    fn values(&self) -> Vec<Value> {
        vec![text(&self.0.address_line)]
    }
}
