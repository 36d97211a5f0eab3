use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use ufdur_pivot::CacheValue;

use crate::error::MergeError;
use crate::schema::{canonical_header, CanonicalRow, Column, CANONICAL_WIDTH};

/// Extract a fiscal period code such as `FY24Q1` from a file name (case-insensitive).
pub fn period_label_from_file_name(file_name: &str) -> Option<String> {
    static PERIOD_RE: OnceLock<Regex> = OnceLock::new();
    let re = PERIOD_RE.get_or_init(|| Regex::new(r"(?i)FY\d{2}Q\d").expect("valid period regex"));
    re.find(file_name).map(|m| m.as_str().to_ascii_uppercase())
}

/// Output label for an input file: its fiscal period code if it has one, otherwise the first
/// `_`-separated segment of the file stem.
pub fn default_output_label(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(label) = period_label_from_file_name(&file_name) {
        return label;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.split('_').next().unwrap_or_default().to_string()
}

/// Normalized rows for one reporting period, main-cache rows first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodTable {
    pub rows: Vec<CanonicalRow>,
}

impl PeriodTable {
    pub fn new(rows: Vec<CanonicalRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the canonical header followed by one CSV line per row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        write_rows(&self.rows, writer)
    }

    pub fn read_csv_file(path: &Path) -> Result<Self, MergeError> {
        let file = File::open(path)?;
        Self::read_csv(BufReader::new(file), path)
    }

    /// Read a period table previously written by [`Self::write_csv`].
    ///
    /// Fields are kept verbatim as strings. Columns are matched by header name, so a file
    /// with reordered, missing or extra columns still yields canonical rows. Columns absent
    /// from the header are back-filled like a normalized cache (`ClaimState` becomes
    /// `"AGGREGATED"`, everything else an empty string). A header without `Qtr` cannot be a
    /// period table.
    pub fn read_csv<R: Read>(reader: R, path: &Path) -> Result<Self, MergeError> {
        let mut input = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = input.headers()?.clone();
        let mut source_index: [Option<usize>; CANONICAL_WIDTH] = [None; CANONICAL_WIDTH];
        let mut unexpected = Vec::new();
        for (idx, name) in headers.iter().enumerate() {
            match Column::from_name(name) {
                Some(column) if source_index[column.index()].is_none() => {
                    source_index[column.index()] = Some(idx);
                }
                _ => unexpected.push(name.to_string()),
            }
        }
        if source_index[Column::Qtr.index()].is_none() {
            return Err(MergeError::InvalidPeriodTable {
                path: path.to_path_buf(),
                reason: "header has no Qtr column".to_string(),
            });
        }

        let missing: Vec<&str> = Column::ALL
            .into_iter()
            .filter(|c| source_index[c.index()].is_none())
            .map(Column::name)
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            log::warn!(
                "{}: non-canonical header (missing {missing:?}, unexpected {unexpected:?})",
                path.display()
            );
        }

        let mut rows = Vec::new();
        for record in input.records() {
            let record = record?;
            rows.push(CanonicalRow::new(Column::ALL.map(|column| {
                match source_index[column.index()] {
                    Some(idx) => {
                        CacheValue::String(record.get(idx).unwrap_or_default().to_string())
                    }
                    None => column.backfill(),
                }
            })));
        }

        Ok(Self { rows })
    }
}

pub(crate) fn write_rows<W: Write>(rows: &[CanonicalRow], writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(canonical_header())?;
    for row in rows {
        out.write_record(row.values().iter().map(ToString::to_string))?;
    }
    out.flush()?;
    Ok(())
}
