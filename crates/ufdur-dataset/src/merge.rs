use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ufdur_pivot::CacheValue;

use crate::error::MergeError;
use crate::extract::DEFAULT_PERIOD_FILE_SUFFIX;
use crate::fs::atomic_write;
use crate::period::{write_rows, PeriodTable};
use crate::schema::{CanonicalRow, Column};

pub const DEFAULT_MASTER_MARKER: &str = "Master";
pub const DEFAULT_MASTER_FILE_NAME: &str = "UFDUR_Master.csv";

#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// Only files whose name ends with this suffix are period tables.
    pub period_file_suffix: String,
    /// Files whose name contains this marker are prior master outputs and never merged.
    pub master_marker: String,
    /// Name of the master table written by [`merge_periods_in_dir`].
    pub master_file_name: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            period_file_suffix: DEFAULT_PERIOD_FILE_SUFFIX.to_string(),
            master_marker: DEFAULT_MASTER_MARKER.to_string(),
            master_file_name: DEFAULT_MASTER_FILE_NAME.to_string(),
        }
    }
}

/// Row count and `ThirtyDayEquiv` total for one quarter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuarterSummary {
    pub records: usize,
    pub thirty_day_equiv: f64,
}

/// Per-quarter aggregates of a master table, keyed by the verbatim `Qtr` value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodSummary {
    pub quarters: BTreeMap<String, QuarterSummary>,
}

impl PeriodSummary {
    pub fn get(&self, qtr: &str) -> Option<&QuarterSummary> {
        self.quarters.get(qtr)
    }

    pub fn len(&self) -> usize {
        self.quarters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quarters.is_empty()
    }

    pub fn total_records(&self) -> usize {
        self.quarters.values().map(|q| q.records).sum()
    }
}

impl fmt::Display for PeriodSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (qtr, summary) in &self.quarters {
            let qtr = if qtr.is_empty() { "(blank)" } else { qtr.as_str() };
            writeln!(
                f,
                "{qtr}: {} records, {:.2} 30-Day Equiv",
                summary.records, summary.thirty_day_equiv
            )?;
        }
        Ok(())
    }
}

/// Numeric reading of a `ThirtyDayEquiv` cell for summary totals.
///
/// Only used for aggregation: blank, non-numeric and non-finite cells count as zero here but
/// stay verbatim in the row data.
pub fn summary_number(value: &CacheValue) -> f64 {
    let n = match value {
        CacheValue::Number(n) => *n,
        CacheValue::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        CacheValue::Bool(_) | CacheValue::Missing => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

/// Row-wise union of every period table, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterTable {
    pub rows: Vec<CanonicalRow>,
}

impl MasterTable {
    pub fn from_periods(periods: impl IntoIterator<Item = PeriodTable>) -> Self {
        let rows = periods.into_iter().flat_map(|p| p.rows).collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> PeriodSummary {
        let mut quarters: BTreeMap<String, QuarterSummary> = BTreeMap::new();
        for row in &self.rows {
            let qtr = row[Column::Qtr].to_string();
            let entry = quarters.entry(qtr).or_default();
            entry.records += 1;
            entry.thirty_day_equiv += summary_number(&row[Column::ThirtyDayEquiv]);
        }
        PeriodSummary { quarters }
    }

    /// Same layout as a period table.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        write_rows(&self.rows, writer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub output_path: PathBuf,
    /// Period files merged, in merge order.
    pub inputs: Vec<PathBuf>,
    pub rows: usize,
    pub summary: PeriodSummary,
}

/// List the period tables in `dir`, sorted by file name.
///
/// A file qualifies when its name ends with the period suffix, does not contain the master
/// marker and is not `output` itself.
pub fn discover_period_files(
    dir: &Path,
    output: &Path,
    options: &MergeOptions,
) -> Result<Vec<PathBuf>, MergeError> {
    if !dir.is_dir() {
        return Err(MergeError::MissingDirectory(dir.to_path_buf()));
    }
    let output_name = output.file_name();

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            log::debug!("skipping non UTF-8 file name {:?}", file_name);
            continue;
        };
        if !name.ends_with(&options.period_file_suffix) || name.contains(&options.master_marker) {
            continue;
        }
        let path = entry.path();
        if output_name == Some(file_name.as_os_str()) && same_dir(dir, output) {
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn same_dir(dir: &Path, output: &Path) -> bool {
    let Some(parent) = output.parent() else {
        return false;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match (fs::canonicalize(dir), fs::canonicalize(parent)) {
        (Ok(a), Ok(b)) => a == b,
        _ => dir == parent,
    }
}

/// Rebuild the master table at `output` from every period table in `dir`.
///
/// The master is recomputed in full on every call, so rerunning over the same period files
/// produces byte-identical output. With no period files nothing is written and an existing
/// master is left untouched.
pub fn merge_periods(
    dir: &Path,
    output: &Path,
    options: &MergeOptions,
) -> Result<MergeReport, MergeError> {
    let inputs = discover_period_files(dir, output, options)?;
    if inputs.is_empty() {
        log::warn!("no period tables found in {}", dir.display());
        return Err(MergeError::NoInputToMerge {
            dir: dir.to_path_buf(),
        });
    }
    log::info!("merging {} period tables from {}", inputs.len(), dir.display());

    let mut periods = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let table = PeriodTable::read_csv_file(path)?;
        log::debug!("{}: {} rows", path.display(), table.len());
        periods.push(table);
    }
    let master = MasterTable::from_periods(periods);
    let summary = master.summary();

    atomic_write(output, |file| master.write_csv(file).map_err(MergeError::from))?;
    log::info!("saved {} ({} rows)", output.display(), master.len());
    for (qtr, q) in &summary.quarters {
        log::info!(
            "{qtr}: {} records, {:.2} 30-Day Equiv",
            q.records,
            q.thirty_day_equiv
        );
    }

    Ok(MergeReport {
        output_path: output.to_path_buf(),
        inputs,
        rows: master.len(),
        summary,
    })
}

/// [`merge_periods`] writing to `{dir}/{master_file_name}`.
pub fn merge_periods_in_dir(dir: &Path, options: &MergeOptions) -> Result<MergeReport, MergeError> {
    let output = dir.join(&options.master_file_name);
    merge_periods(dir, &output, options)
}
