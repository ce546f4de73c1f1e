use chrono::NaiveDate;

/// Date layout of the history table and of every exported file.
pub const TABLE_DATE_FORMAT: &str = "%d/%m/%Y";

// ── Cells ─────────────────────────────────────────────────────────────────────

/// Normalise one table cell: trim, drop non-breaking spaces, and switch the
/// decimal comma to a dot.
/// " 1\u{a0}250,50 " → "1250.50" | "15/03/2023" → "15/03/2023"
pub fn clean_cell(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect()
}

/// Header text is trimmed only; it becomes a CSV column name.
pub fn clean_header(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Dates ─────────────────────────────────────────────────────────────────────

/// Parse a `DD/MM/YYYY` cell. Anything else is `None`, never an error.
pub fn parse_table_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), TABLE_DATE_FORMAT).ok()
}

pub fn format_table_date(date: NaiveDate) -> String {
    date.format(TABLE_DATE_FORMAT).to_string()
}

/// Parse a date given on the command line or in config: ISO first, then the
/// table layout.
pub fn parse_user_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_table_date(s))
}

// ── Labels ────────────────────────────────────────────────────────────────────

/// Collapse runs of whitespace in a selector option label.
pub fn normalise_label(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
