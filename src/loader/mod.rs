//! Reads a checkpoint or fallback CSV back into raw records, so a run that
//! died mid-way can still be finalised without scraping again.

use crate::models::{RawRecord, INSTRUMENT_COLUMN};
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

pub fn load_checkpoint(path: &Path) -> Result<Vec<RawRecord>> {
    if !path.is_file() {
        bail!("No checkpoint at {:?}", path);
    }
    debug!("Loading checkpoint {:?}", path);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("No header row in {:?}", path))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let Some(action_idx) = headers.iter().position(|h| h == INSTRUMENT_COLUMN) else {
        bail!("{:?} has no {} column", path, INSTRUMENT_COLUMN);
    };

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let instrument = row.get(action_idx).unwrap_or_default().to_string();
        let fields = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != action_idx)
            .filter_map(|(idx, h)| row.get(idx).map(|v| (h.clone(), v.to_string())))
            .collect();

        records.push(RawRecord { instrument, fields });
    }

    info!("{:?}: {} records loaded", path, records.len());
    Ok(records)
}
