//! Delimited tables as read from external logs and written as BIDS TSV.
//!
//! Input logs are comma or tab separated with optional double-quoted fields.
//! Output is always tab separated with `n/a` as the null sentinel.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

/// Null sentinel written to every derived table.
pub const NULL: &str = "n/a";

/// Values parsed as null from source tables (compared case-insensitively).
const NULL_INPUTS: [&str; 3] = ["", "na", "n/a"];

pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Read a table, picking the delimiter from the extension (`.tsv` is tab,
    /// anything else comma).
    pub fn read(path: &Path) -> Result<Self> {
        let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
            Some("tsv") => '\t',
            _ => ',',
        };
        let text =
            fs::read_to_string(path).with_context(|| format!("read table {}", path.display()))?;
        Self::parse(&text, delimiter).with_context(|| format!("parse table {}", path.display()))
    }

    pub fn parse(text: &str, delimiter: char) -> Result<Self> {
        let mut records = split_records(text, delimiter)?.into_iter();
        let Some(header) = records.next() else {
            return Ok(Self::default());
        };
        let columns: Vec<String> = header.into_iter().map(|c| c.trim().to_string()).collect();
        let mut rows = Vec::new();
        for (idx, record) in records.enumerate() {
            if record.len() == 1 && record[0].is_empty() {
                continue;
            }
            if record.len() > columns.len() {
                return Err(anyhow!(
                    "row {} has {} fields, header has {}",
                    idx + 2,
                    record.len(),
                    columns.len()
                ));
            }
            let mut row: Row = record.into_iter().map(null_if_sentinel).collect();
            row.resize(columns.len(), None);
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| anyhow!("missing column {name:?}"))
    }

    pub fn value<'a>(&self, row: &'a Row, column: usize) -> Option<&'a str> {
        row.get(column).and_then(|value| value.as_deref())
    }

    pub fn push(&mut self, row: Row) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only rows accepted by `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&Row) -> bool) {
        self.rows.retain(keep);
    }

    /// Render as BIDS TSV: header always present, nulls as `n/a`.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.columns.join("\t"));
        out.push('\n');
        for row in &self.rows {
            let fields: Vec<&str> = row
                .iter()
                .map(|value| value.as_deref().unwrap_or(NULL))
                .collect();
            out.push_str(&fields.join("\t"));
            out.push('\n');
        }
        out
    }

    pub fn write_tsv(&self, dest: &Path) -> Result<()> {
        crate::util::write_atomic_text(dest, &self.to_tsv())
    }
}

fn null_if_sentinel(value: String) -> Option<String> {
    let trimmed = value.trim();
    if NULL_INPUTS
        .iter()
        .any(|null| trimmed.eq_ignore_ascii_case(null))
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if in_quotes {
        return Err(anyhow!("unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_csv_with_nulls() {
        let text = "record_id,\"Face Mask\",note\n10001,1,\"a, b\"\n10002,NA,\n";
        let table = Table::parse(text, ',').expect("parse");
        assert_eq!(table.columns, vec!["record_id", "Face Mask", "note"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][2].as_deref(), Some("a, b"));
        assert_eq!(table.rows[1][1], None);
        assert_eq!(table.rows[1][2], None);
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let table = Table::parse("a\tb\tc\n1\t2\n", '\t').expect("parse");
        assert_eq!(table.rows[0], vec![Some("1".into()), Some("2".into()), None]);
    }

    #[test]
    fn long_rows_are_rejected() {
        assert!(Table::parse("a\n1,2\n", ',').is_err());
    }

    #[test]
    fn empty_table_renders_header_only() {
        let table = Table::new(vec!["sub".into(), "sex".into()]);
        assert_eq!(table.to_tsv(), "sub\tsex\n");
    }

    #[test]
    fn nulls_render_as_sentinel() {
        let mut table = Table::new(vec!["filename".into(), "rating".into()]);
        table.push(vec![Some("anat/x.nii.gz".into()), None]);
        assert_eq!(table.to_tsv(), "filename\trating\nanat/x.nii.gz\tn/a\n");
    }

    #[test]
    fn read_picks_delimiter_from_extension() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("volumes.tsv");
        fs::write(&path, "sub\tses\tvalue\n10001\tV1\t1,5\n").expect("write");
        let table = Table::read(&path).expect("read");
        assert_eq!(table.rows[0][2].as_deref(), Some("1,5"));
    }
}
