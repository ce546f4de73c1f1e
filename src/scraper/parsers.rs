use crate::models::RawHistoricalRow;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::cleaner::{clean_cell, clean_header};
use super::{ScrapeError, HISTORY_TABLE_ID};

// ── History table ─────────────────────────────────────────────────────────────

/// Selectors used to walk the history table, parsed once per page.
struct TableSelectors {
    table: Selector,
    header: Selector,
    body_row: Selector,
    cell: Selector,
}

impl TableSelectors {
    fn new() -> Result<Self, ScrapeError> {
        Ok(Self {
            table: parse_selector(&format!("table#{HISTORY_TABLE_ID}"))?,
            header: parse_selector("thead th")?,
            body_row: parse_selector("tbody tr")?,
            cell: parse_selector("td")?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(s).map_err(|e| ScrapeError::Selector(format!("{s}: {e:?}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>()
}

/// Parse the rendered history table into rows keyed by header text.
///
/// A page without the table, without a header or without a body yields an
/// empty vector. Rows with no `td` are skipped; a row shorter than the
/// header just carries fewer cells, and cells past the last header are
/// dropped.
pub fn parse_history_table(html: &str) -> Result<Vec<RawHistoricalRow>, ScrapeError> {
    let sel = TableSelectors::new()?;
    let doc = Html::parse_document(html);

    let Some(table) = doc.select(&sel.table).next() else {
        debug!("No #{} table on page", HISTORY_TABLE_ID);
        return Ok(vec![]);
    };

    let headers: Vec<String> = table
        .select(&sel.header)
        .map(|th| clean_header(&element_text(th)))
        .collect();

    let mut rows = Vec::new();
    for tr in table.select(&sel.body_row) {
        let cells: Vec<String> = tr
            .select(&sel.cell)
            .map(|td| clean_cell(&element_text(td)))
            .collect();

        if cells.is_empty() {
            continue;
        }

        rows.push(RawHistoricalRow {
            cells: headers.iter().cloned().zip(cells).collect(),
        });
    }

    Ok(rows)
}
