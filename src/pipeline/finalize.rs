//! Post-processing of the accumulated rows: dedupe, date sort, final file.

use crate::config::OutputConfig;
use crate::models::{RawRecord, RunOutcome, DATE_COLUMN};
use crate::scraper::cleaner::{format_table_date, parse_table_date};
use crate::storage::{write_records, StorageError};
use std::collections::HashSet;
use thiserror::Error;

use super::report::{emit, Reporter};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("no {0} column in the collected rows")]
    MissingColumn(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Drop exact duplicates, keeping the first occurrence.
/// Returns the kept rows and how many were removed.
pub fn dedupe(records: Vec<RawRecord>) -> (Vec<RawRecord>, usize) {
    let before = records.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Stable ascending sort on the `Date` column. Unparseable or missing dates
/// go last and come out as an empty cell; parsed ones are re-rendered as
/// `DD/MM/YYYY`.
pub fn sort_by_date(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut keyed: Vec<_> = records
        .into_iter()
        .map(|r| (r.get(DATE_COLUMN).and_then(parse_table_date), r))
        .collect();

    keyed.sort_by_key(|(date, _)| (date.is_none(), *date));

    keyed
        .into_iter()
        .map(|(date, mut r)| {
            r.set(DATE_COLUMN, date.map(format_table_date).unwrap_or_default());
            r
        })
        .collect()
}

fn distinct_instruments(records: &[RawRecord]) -> usize {
    records
        .iter()
        .map(|r| r.instrument.as_str())
        .collect::<HashSet<_>>()
        .len()
}

fn sort_and_write(
    records: &[RawRecord],
    output: &OutputConfig,
) -> Result<(usize, usize), FinalizeError> {
    if !records.iter().any(|r| r.get(DATE_COLUMN).is_some()) {
        return Err(FinalizeError::MissingColumn(DATE_COLUMN));
    }
    let sorted = sort_by_date(records.to_vec());
    let written = write_records(&output.final_path(), &sorted)?;
    Ok((written, distinct_instruments(&sorted)))
}

/// Turn the run's accumulator into the final dataset.
///
/// Nothing is written for an empty accumulator. If sorting or writing
/// fails, the deduplicated rows are dumped unsorted to the fallback file.
pub fn finalize(
    records: Vec<RawRecord>,
    output: &OutputConfig,
    reporter: &dyn Reporter,
) -> RunOutcome {
    if records.is_empty() {
        emit(reporter, "No data collected");
        return RunOutcome::no_data();
    }

    emit(reporter, "Post-processing collected rows...");
    let (records, removed) = dedupe(records);
    emit(reporter, &format!("{} duplicates removed", removed));

    match sort_and_write(&records, output) {
        Ok((written, actions)) => {
            let path = output.final_path();
            emit(
                reporter,
                &format!("Final file {:?} written with {} records", path, written),
            );
            RunOutcome::completed(written, actions, removed, path)
        }
        Err(e) => {
            emit(reporter, &format!("Post-processing error: {}", e));
            let fallback = output.fallback_path();
            match write_records(&fallback, &records) {
                Ok(_) => {
                    emit(reporter, &format!("Unsorted rows saved to {:?}", fallback));
                    let mut outcome = RunOutcome::failure(
                        format!("post-processing failed: {e}"),
                        Some(fallback),
                    );
                    outcome.duplicates_removed = removed;
                    outcome
                }
                Err(we) => {
                    emit(reporter, &format!("Fallback write failed: {}", we));
                    RunOutcome::failure(
                        format!("post-processing failed: {e}; fallback write failed: {we}"),
                        None,
                    )
                }
            }
        }
    }
}
