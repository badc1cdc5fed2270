//! CSV persistence for roster and analytics rows.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::core::error::Result;

/// Write `records` with a header row derived from `T`'s field names.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    debug!("export: wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

/// Write `records` under an explicit header, which is emitted even when
/// there are no rows.
pub fn write_table<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(header)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    debug!("export: wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

/// Read every row of a headed CSV file.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    debug!("export: read {} rows from {}", records.len(), path.display());
    Ok(records)
}
