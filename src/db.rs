use std::path::Path;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, Row, Statement};
use tracing::{debug, info};

use crate::dedup::PastResult;
use crate::errors::{AppError, AppResult};
use crate::ingestion::{RouteColumns, SegmentedAddress};
use crate::results::OutputRow;

/// Opens (creating if needed) the results database.
pub fn open(path: &Path) -> AppResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(path, flags)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;
    info!(target: "database", path = %path.display(), "database opened");
    Ok(connection)
}

/// Reads the `Source` and `Destination` columns of `query`.
///
/// Null or blank cells are dropped per column, so a query with holes yields
/// columns of different lengths and is rejected at assembly.
pub fn read_route_columns(connection: &Connection, query: &str) -> AppResult<RouteColumns> {
    let mut stmt = connection.prepare(query)?;
    let source_idx = named_column(&stmt, "Source")?;
    let destination_idx = named_column(&stmt, "Destination")?;

    let mut columns = RouteColumns::default();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if let Some(source) = cell_text(row, source_idx)? {
            columns.sources.push(source);
        }
        if let Some(destination) = cell_text(row, destination_idx)? {
            columns.destinations.push(destination);
        }
    }
    debug!(
        target: "database",
        sources = columns.sources.len(),
        destinations = columns.destinations.len(),
        "read route query"
    );
    Ok(columns)
}

pub fn read_addresses(connection: &Connection, query: &str) -> AppResult<Vec<String>> {
    let mut stmt = connection.prepare(query)?;
    let idx = named_column(&stmt, "Address")?;
    let mut addresses = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if let Some(address) = cell_text(row, idx)? {
            addresses.push(address);
        }
    }
    debug!(target: "database", count = addresses.len(), "read address query");
    Ok(addresses)
}

pub fn read_segmented(connection: &Connection, query: &str) -> AppResult<Vec<SegmentedAddress>> {
    let mut stmt = connection.prepare(query)?;
    let indexes = [
        named_column(&stmt, "countryRegion")?,
        named_column(&stmt, "adminDistrict")?,
        named_column(&stmt, "locality")?,
        named_column(&stmt, "postalCode")?,
        named_column(&stmt, "addressLine")?,
    ];
    let mut addresses = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let field = |i: usize| -> AppResult<String> {
            Ok(cell_text(row, indexes[i])?.unwrap_or_default())
        };
        addresses.push(SegmentedAddress {
            country_region: field(0)?,
            admin_district: field(1)?,
            locality: field(2)?,
            postal_code: field(3)?,
            address_line: field(4)?,
        });
    }
    debug!(target: "database", count = addresses.len(), "read segmented query");
    Ok(addresses)
}

/// Reads previously stored results. `KeyID` is required; travel columns are
/// picked up when the query provides them.
pub fn read_past_results(connection: &Connection, query: &str) -> AppResult<Vec<PastResult>> {
    let mut stmt = connection.prepare(query)?;
    let key_idx = named_column(&stmt, "KeyID")?;
    let duration_idx = optional_column(&stmt, "TravelDuration");
    let distance_idx = optional_column(&stmt, "TravelDistance");

    let mut past = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let Some(key) = cell_text(row, key_idx)? else {
            continue;
        };
        past.push(PastResult {
            key,
            travel_duration: cell_real(row, duration_idx)?,
            travel_distance: cell_real(row, distance_idx)?,
        });
    }
    debug!(target: "database", count = past.len(), "read past results");
    Ok(past)
}

/// Appends `rows` to `table`, creating the table and any missing columns first.
pub fn append_rows<R: OutputRow>(
    connection: &mut Connection,
    table: &str,
    rows: &[R],
) -> AppResult<usize> {
    validate_identifier(table)?;
    ensure_table(connection, table, R::COLUMNS)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let columns: Vec<String> = R::COLUMNS
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect();
    let placeholders: Vec<String> = (1..=R::COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO \"{table}\" ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );

    let tx = connection.transaction()?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.values()))?;
        }
    }
    tx.commit()?;
    info!(target: "database", table, rows = rows.len(), "rows appended");
    Ok(rows.len())
}

pub fn count_rows(connection: &Connection, table: &str) -> AppResult<i64> {
    validate_identifier(table)?;
    let count = connection.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

fn ensure_table(
    connection: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> AppResult<()> {
    let definitions: Vec<String> = columns
        .iter()
        .map(|(name, sql_type)| format!("\"{name}\" {sql_type}"))
        .collect();
    connection.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" ({})",
            definitions.join(", ")
        ),
        [],
    )?;
    for (name, sql_type) in columns {
        ensure_column(connection, table, name, sql_type)?;
    }
    Ok(())
}

fn ensure_column(
    connection: &Connection,
    table: &str,
    column: &str,
    sql_type: &str,
) -> AppResult<()> {
    if column_exists(connection, table, column)? {
        return Ok(());
    }
    debug!(target: "database", table, column, "adding missing column");
    let sql = format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {sql_type}");
    connection.execute(&sql, [])?;
    Ok(())
}

fn column_exists(connection: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info(\"{table}\")");
    let mut stmt = connection.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Output table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> AppResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid table name: {name:?}")))
    }
}

fn named_column(stmt: &Statement<'_>, name: &str) -> AppResult<usize> {
    optional_column(stmt, name)
        .ok_or_else(|| AppError::Config(format!("query result has no [{name}] column")))
}

fn optional_column(stmt: &Statement<'_>, name: &str) -> Option<usize> {
    stmt.column_names()
        .iter()
        .position(|column| column.eq_ignore_ascii_case(name))
}

/// Any scalar cell as trimmed text; `None` for null or blank.
fn cell_text(row: &Row<'_>, idx: usize) -> AppResult<Option<String>> {
    let text = match row.get_ref(idx)? {
        ValueRef::Null => return Ok(None),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).trim().to_string()
        }
    };
    Ok(Some(text).filter(|t| !t.is_empty()))
}

fn cell_real(row: &Row<'_>, idx: Option<usize>) -> AppResult<Option<f64>> {
    let Some(idx) = idx else {
        return Ok(None);
    };
    let value = match row.get::<_, Value>(idx)? {
        Value::Integer(i) => Some(i as f64),
        Value::Real(f) => Some(f),
        Value::Text(t) => t.trim().parse().ok(),
        Value::Null | Value::Blob(_) => None,
    };
    Ok(value)
}
