use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::StoreResult;
use crate::table::Table;

/// Everything a user can export from account settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub exported_at: DateTime<Utc>,
    pub tables: Vec<Table>,
}

impl ExportBundle {
    pub fn new(tables: Vec<Table>) -> Self {
        ExportBundle {
            exported_at: Utc::now(),
            tables,
        }
    }
}

/// Write tables as a gzip-compressed bincode archive.
pub fn save_tables(tables: &[Table], path: impl AsRef<Path>) -> StoreResult<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);
    serialize_into(&mut writer, &ExportBundle::new(tables.to_vec()))?;
    writer.flush()?;
    Ok(())
}

pub fn load_tables(path: impl AsRef<Path>) -> StoreResult<Vec<Table>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(GzDecoder::new(file));
    let bundle: ExportBundle = deserialize_from(&mut reader)?;
    Ok(bundle.tables)
}

/// Pretty JSON export.
pub fn export_json(tables: &[Table]) -> StoreResult<String> {
    Ok(serde_json::to_string_pretty(&ExportBundle::new(
        tables.to_vec(),
    ))?)
}

/// Accepts either an export bundle or a bare table list.
pub fn import_json(text: &str) -> StoreResult<Vec<Table>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Import {
        Bundle(ExportBundle),
        Tables(Vec<Table>),
    }
    Ok(match serde_json::from_str(text)? {
        Import::Bundle(bundle) => bundle.tables,
        Import::Tables(tables) => tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    fn sample() -> Vec<Table> {
        let mut table = Table::create("Groceries", 2, 2);
        *table.cell_at_mut(0, 0).unwrap() = Cell::plain("4");
        *table.cell_at_mut(1, 0).unwrap() = Cell::computed("=A1*2", "8".into());
        vec![table]
    }

    #[test]
    fn archive_preserves_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget.bin.gz");
        let tables = sample();
        save_tables(&tables, &path).unwrap();
        assert_eq!(load_tables(&path).unwrap(), tables);
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin.gz");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(load_tables(&path).is_err());
        assert!(load_tables(dir.path().join("missing")).is_err());
    }

    #[test]
    fn json_import_accepts_bundle_or_list() {
        let tables = sample();
        let exported = export_json(&tables).unwrap();
        assert!(exported.contains("\"exportedAt\""));
        assert_eq!(import_json(&exported).unwrap(), tables);

        let bare = serde_json::to_string(&tables).unwrap();
        assert_eq!(import_json(&bare).unwrap(), tables);
        assert!(import_json("{\"nope\": 1}").is_err());
    }
}
