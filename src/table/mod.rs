pub mod csv;
pub mod xlsx;

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;

pub type Record = HashMap<String, String>;

#[derive(Clone, Debug, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Table {
    /// Pairs each row with the header at the same position; short rows are padded with "".
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let records = rows
            .into_iter()
            .map(|row| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect();
        Self { headers, records }
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Delimited,
    Spreadsheet,
}

impl TableFormat {
    /// By extension first, then by the zip signature.
    pub fn detect(path: &Path) -> anyhow::Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") | Some("txt") => return Ok(Self::Delimited),
            Some("xlsx") | Some("xlsm") => return Ok(Self::Spreadsheet),
            _ => {}
        }
        let mut f = File::open(path).with_context(|| format!("open: {}", path.display()))?;
        let mut sig = [0u8; 2];
        let n = f.read(&mut sig).with_context(|| format!("read: {}", path.display()))?;
        if n == 2 && &sig == b"PK" {
            Ok(Self::Spreadsheet)
        } else {
            Ok(Self::Delimited)
        }
    }
}

/// Source table reader: one implementation per on-disk format.
pub trait TableReader {
    fn read(&self, path: &Path) -> anyhow::Result<Table>;
}

pub struct DelimitedReader;

impl TableReader for DelimitedReader {
    fn read(&self, path: &Path) -> anyhow::Result<Table> {
        let (headers, rows) = self::csv::read_rows(path)?;
        Ok(Table::from_rows(headers, rows))
    }
}

/// Reads the first worksheet, or the one named by `sheet`.
#[derive(Default)]
pub struct SpreadsheetReader {
    pub sheet: Option<String>,
}

impl TableReader for SpreadsheetReader {
    fn read(&self, path: &Path) -> anyhow::Result<Table> {
        let wb = xlsx::Workbook::open(path)?;
        let rows = match self.sheet.as_deref() {
            Some(name) => wb.rows(name)?,
            None => wb.first_sheet_rows()?,
        };
        Ok(table_from_sheet_rows(rows))
    }
}

/// First non-blank row is the header; blank header cells become `col<N>`.
pub fn table_from_sheet_rows(rows: Vec<Vec<String>>) -> Table {
    let mut rows = rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()));
    let Some(header_row) = rows.next() else {
        return Table::default();
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() {
                format!("col{}", i + 1)
            } else {
                h.to_string()
            }
        })
        .collect();
    Table::from_rows(headers, rows.collect())
}

pub fn read_table(path: &Path) -> anyhow::Result<Table> {
    if !path.exists() {
        anyhow::bail!("input not found: {}", path.display());
    }
    match TableFormat::detect(path)? {
        TableFormat::Delimited => DelimitedReader.read(path),
        TableFormat::Spreadsheet => SpreadsheetReader::default().read(path),
    }
}
