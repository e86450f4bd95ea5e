use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use tracing::info;

use crate::errors::AppResult;
use crate::results::OutputRow;

pub const DONE_FILE: &str = "done.csv";
pub const ERRORS_FILE: &str = "errors.csv";

/// Writes `rows` with a header line to `dir/file_name`, replacing any previous file.
pub fn write_csv<R: OutputRow>(dir: &Path, file_name: &str, rows: &[R]) -> AppResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(R::COLUMNS.iter().map(|(name, _)| *name))?;
    for row in rows {
        writer.write_record(row.values().iter().map(render))?;
    }
    writer.flush()?;
    info!(target: "pipeline", path = %path.display(), rows = rows.len(), "csv exported");
    Ok(path)
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}
