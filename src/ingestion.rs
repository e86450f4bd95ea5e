use std::path::Path;

use tracing::debug;

use crate::errors::{AppError, AppResult};

const KEY_SEPARATOR: &str = "+";

/// Anything that can be looked up and de-duplicated by a string key.
pub trait WorkItem {
    fn dedup_key(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePair {
    pub source: String,
    pub destination: String,
}

impl RoutePair {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl WorkItem for RoutePair {
    fn dedup_key(&self) -> String {
        route_key(&self.source, &self.destination)
    }
}

pub fn route_key(source: &str, destination: &str) -> String {
    format!("{source}{KEY_SEPARATOR}{destination}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
}

impl WorkItem for Address {
    fn dedup_key(&self) -> String {
        self.address.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedAddress {
    pub country_region: String,
    pub admin_district: String,
    pub locality: String,
    pub postal_code: String,
    pub address_line: String,
}

impl WorkItem for SegmentedAddress {
    fn dedup_key(&self) -> String {
        [
            self.country_region.as_str(),
            self.admin_district.as_str(),
            self.locality.as_str(),
            self.postal_code.as_str(),
            self.address_line.as_str(),
        ]
        .join(KEY_SEPARATOR)
    }
}

/// The candidate rows of one run, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemSet<T> {
    pub items: Vec<T>,
}

impl<T> WorkItemSet<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Zips the parallel source and destination columns into route pairs.
///
/// Mismatched lengths abort the whole run before any request is made.
pub fn assemble_route_queries(
    sources: Vec<String>,
    destinations: Vec<String>,
) -> AppResult<WorkItemSet<RoutePair>> {
    if sources.len() != destinations.len() {
        return Err(AppError::LengthMismatch {
            what: "source and destination",
            left: sources.len(),
            right: destinations.len(),
        });
    }
    let items = sources
        .into_iter()
        .zip(destinations)
        .map(|(source, destination)| RoutePair {
            source,
            destination,
        })
        .collect();
    Ok(WorkItemSet::new(items))
}

pub fn assemble_address_queries(addresses: Vec<String>) -> WorkItemSet<Address> {
    WorkItemSet::new(
        addresses
            .into_iter()
            .map(|address| Address { address })
            .collect(),
    )
}

pub fn assemble_segmented_queries(rows: Vec<SegmentedAddress>) -> WorkItemSet<SegmentedAddress> {
    WorkItemSet::new(rows)
}

/// Column-oriented route input, as read from a table or a CSV file.
#[derive(Debug, Default, Clone)]
pub struct RouteColumns {
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
}

impl RouteColumns {
    pub fn into_queries(self) -> AppResult<WorkItemSet<RoutePair>> {
        assemble_route_queries(self.sources, self.destinations)
    }
}

/// Reads `Source` and `Destination` columns from a CSV file.
///
/// Rows may be ragged; a missing destination cell leaves the columns
/// unequal, which [`RouteColumns::into_queries`] rejects.
pub fn read_route_csv(path: &Path) -> AppResult<RouteColumns> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let source_idx = column_index(&headers, "Source", path)?;
    let destination_idx = column_index(&headers, "Destination", path)?;

    let mut columns = RouteColumns::default();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = non_empty(record.get(source_idx)) {
            columns.sources.push(value);
        }
        if let Some(value) = non_empty(record.get(destination_idx)) {
            columns.destinations.push(value);
        }
    }
    debug!(
        path = %path.display(),
        sources = columns.sources.len(),
        destinations = columns.destinations.len(),
        "read route csv"
    );
    Ok(columns)
}

pub fn read_address_csv(path: &Path) -> AppResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let idx = column_index(&headers, "Address", path)?;
    let mut addresses = Vec::new();
    for record in reader.records() {
        if let Some(value) = non_empty(record?.get(idx)) {
            addresses.push(value);
        }
    }
    Ok(addresses)
}

pub fn read_segmented_csv(path: &Path) -> AppResult<Vec<SegmentedAddress>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let indexes = [
        column_index(&headers, "countryRegion", path)?,
        column_index(&headers, "adminDistrict", path)?,
        column_index(&headers, "locality", path)?,
        column_index(&headers, "postalCode", path)?,
        column_index(&headers, "addressLine", path)?,
    ];
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(indexes[i]).unwrap_or("").trim().to_string();
        rows.push(SegmentedAddress {
            country_region: field(0),
            admin_district: field(1),
            locality: field(2),
            postal_code: field(3),
            address_line: field(4),
        });
    }
    Ok(rows)
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> AppResult<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            AppError::Config(format!(
                "{} has no [{name}] column",
                path.display()
            ))
        })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn route_key_joins_with_plus() {
        let pair = RoutePair::new("Paris, France", "Lyon, France");
        assert_eq!(pair.dedup_key(), "Paris, France+Lyon, France");
    }

    #[test]
    fn segmented_key_covers_all_fields() {
        let row = SegmentedAddress {
            country_region: "United States".into(),
            admin_district: "WA".into(),
            locality: "Redmond".into(),
            postal_code: "98052".into(),
            address_line: "1 Microsoft Way".into(),
        };
        assert_eq!(
            row.dedup_key(),
            "United States+WA+Redmond+98052+1 Microsoft Way"
        );
    }

    #[test]
    fn mismatched_columns_are_fatal() {
        let err = assemble_route_queries(vec!["A".into(), "C".into()], vec!["B".into()])
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::LengthMismatch {
                left: 2,
                right: 1,
                ..
            }
        ));
    }

    #[test]
    fn reads_route_csv_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("routes.csv");
        fs::write(&path, "Source,Destination\nA,B\nC,D\n").unwrap();

        let set = read_route_csv(&path).unwrap().into_queries().unwrap();
        assert_eq!(
            set.items,
            vec![RoutePair::new("A", "B"), RoutePair::new("C", "D")]
        );
    }

    #[test]
    fn ragged_route_csv_fails_assembly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "Source,Destination\nA,B\nC\n").unwrap();

        let columns = read_route_csv(&path).unwrap();
        assert_eq!(columns.sources.len(), 2);
        assert_eq!(columns.destinations.len(), 1);
        assert!(columns.into_queries().is_err());
    }

    #[test]
    fn reads_segmented_csv_and_requires_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segmented.csv");
        fs::write(
            &path,
            "countryRegion,adminDistrict,locality,postalCode,addressLine\nFrance,IDF,Paris,75001,1 Rue de Rivoli\n",
        )
        .unwrap();
        let rows = read_segmented_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].locality, "Paris");

        let bad = dir.path().join("bad.csv");
        fs::write(&bad, "Street\nsomewhere\n").unwrap();
        assert!(matches!(read_address_csv(&bad), Err(AppError::Config(_))));
    }
}
