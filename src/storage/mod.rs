//! CSV files written by a run: checkpoint, final dataset and fallback dump.
//!
//! Every file starts with a UTF-8 byte-order mark so spreadsheet tools pick
//! the right encoding for accented headers.

use crate::models::{RawRecord, INSTRUMENT_COLUMN};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no file at {0:?}")]
    Missing(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io { path: path.to_path_buf(), source }
}

// ── Columns ───────────────────────────────────────────────────────────────────

/// Union of headers in first-seen order, then the instrument column.
pub fn columns(records: &[RawRecord]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for record in records {
        for (header, _) in &record.fields {
            if header != INSTRUMENT_COLUMN && !cols.iter().any(|c| c == header) {
                cols.push(header.clone());
            }
        }
    }
    cols.push(INSTRUMENT_COLUMN.to_string());
    cols
}

// ── Writers ───────────────────────────────────────────────────────────────────

/// Overwrite `path` with `records`. Returns the number of data rows.
///
/// The file is written to a sibling `.part` file first and renamed into
/// place, so a crash mid-write leaves the previous checkpoint intact.
pub fn write_records(path: &Path, records: &[RawRecord]) -> Result<usize, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let part = path.with_extension("csv.part");
    let cols = columns(records);
    {
        let file = File::create(&part).map_err(io_err(&part))?;
        let mut out = BufWriter::new(file);
        out.write_all(UTF8_BOM).map_err(io_err(&part))?;

        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&cols)?;
        for record in records {
            wtr.write_record(cols.iter().map(|c| {
                if c == INSTRUMENT_COLUMN {
                    record.instrument.as_str()
                } else {
                    record.get(c).unwrap_or("")
                }
            }))?;
        }
        wtr.flush().map_err(io_err(&part))?;
    }
    fs::rename(&part, path).map_err(io_err(path))?;

    debug!("Wrote {} rows to {:?}", records.len(), path);
    Ok(records.len())
}

/// Copy a finished dataset to a user-chosen destination.
pub fn export_copy(src: &Path, dest: &Path) -> Result<u64, StorageError> {
    if !src.is_file() {
        return Err(StorageError::Missing(src.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }
    fs::copy(src, dest).map_err(io_err(dest))
}

/// Number of data rows in a CSV written by [`write_records`].
pub fn count_rows(path: &Path) -> Result<usize, StorageError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut n = 0;
    for row in rdr.records() {
        row?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(instrument: &str, cells: &[(&str, &str)]) -> RawRecord {
        RawRecord {
            instrument: instrument.to_string(),
            fields: cells.iter().map(|(h, v)| (h.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_columns_union_in_first_seen_order() {
        let records = vec![
            rec("BOAB", &[("Date", "01/02/2023"), ("Clôture", "5000")]),
            rec("SNTS", &[("Date", "01/02/2023"), ("Volume", "12")]),
        ];
        assert_eq!(columns(&records), vec!["Date", "Clôture", "Volume", "ACTION"]);
        assert_eq!(columns(&[]), vec!["ACTION"]);
    }

    #[test]
    fn test_write_records_with_bom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("stock_data.csv");
        let records = vec![
            rec("BOAB", &[("Date", "01/02/2023"), ("Clôture", "5000.5")]),
            rec("SNTS", &[("Date", "02/02/2023")]),
        ];

        assert_eq!(write_records(&path, &records).unwrap(), 2);

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Date,Clôture,ACTION");
        assert_eq!(lines[1], "01/02/2023,5000.5,BOAB");
        assert_eq!(lines[2], "02/02/2023,,SNTS");
        assert!(!path.with_extension("csv.part").exists());
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn test_overwrite_replaces_previous_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stock_data_temp.csv");
        let mut records = vec![rec("BOAB", &[("Date", "01/02/2023")])];
        write_records(&path, &records).unwrap();
        records.push(rec("BOAB", &[("Date", "02/02/2023")]));
        write_records(&path, &records).unwrap();
        assert_eq!(count_rows(&path).unwrap(), 2);
    }

    #[test]
    fn test_export_copy() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("stock_data.csv");
        let dest = dir.path().join("exports").join("brvm.csv");

        assert!(matches!(export_copy(&src, &dest), Err(StorageError::Missing(_))));

        write_records(&src, &[rec("BOAB", &[("Date", "01/02/2023")])]).unwrap();
        let n = export_copy(&src, &dest).unwrap();
        assert_eq!(n, fs::metadata(&src).unwrap().len());
        assert_eq!(fs::read(&src).unwrap(), fs::read(&dest).unwrap());
    }
}
