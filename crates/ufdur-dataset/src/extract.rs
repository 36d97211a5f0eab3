use std::fmt;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use ufdur_pivot::{
    AbsentReason, CacheDefinition, CacheLookup, CacheValue, PackageLimits, PivotCachePackage,
};

use crate::error::ExtractError;
use crate::fs::atomic_write;
use crate::period::PeriodTable;
use crate::roles::{detect_roles, CacheRole, RoleAssignment};
use crate::schema::{normalize, Column, SchemaDrift};

pub const DEFAULT_PERIOD_FILE_SUFFIX: &str = "_combined.csv";

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Cache tried first during role detection (and assumed main when detection fails).
    pub main_cache_id: u32,
    pub outliers_cache_id: u32,
    pub limits: PackageLimits,
    /// Appended to the period label to name the per-period output file.
    pub period_file_suffix: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            main_cache_id: 1,
            outliers_cache_id: 2,
            limits: PackageLimits::default(),
            period_file_suffix: DEFAULT_PERIOD_FILE_SUFFIX.to_string(),
        }
    }
}

/// Something that went wrong for one part of an extraction without stopping it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionDiagnostic {
    /// Neither cache exposes `ClaimState`; roles were assigned by the fallback.
    RoleDetectionAmbiguous { assumed_main: u32, assumed_outliers: u32 },
    CacheAbsent {
        role: CacheRole,
        cache_id: u32,
        reason: AbsentReason,
    },
    MalformedStructure {
        role: CacheRole,
        cache_id: u32,
        message: String,
    },
}

impl fmt::Display for ExtractionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionDiagnostic::RoleDetectionAmbiguous {
                assumed_main,
                assumed_outliers,
            } => write!(
                f,
                "cache roles not detected; assumed cache {assumed_main} is main and cache {assumed_outliers} holds outliers"
            ),
            ExtractionDiagnostic::CacheAbsent {
                role,
                cache_id,
                reason,
            } => write!(f, "{role} cache {cache_id} absent: {reason}"),
            ExtractionDiagnostic::MalformedStructure {
                role,
                cache_id,
                message,
            } => write!(f, "{role} cache {cache_id} malformed: {message}"),
        }
    }
}

/// Rows contributed by one role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSummary {
    pub role: CacheRole,
    pub cache_id: u32,
    pub rows: usize,
    pub drift: SchemaDrift,
}

/// Result of extracting one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodExtraction {
    pub roles: RoleAssignment,
    pub table: PeriodTable,
    /// One entry per role that produced rows, main first.
    pub extracted: Vec<RoleSummary>,
    pub diagnostics: Vec<ExtractionDiagnostic>,
}

impl PeriodExtraction {
    /// Whether only one of the two caches contributed rows.
    pub fn is_partial(&self) -> bool {
        self.extracted.len() < 2
    }

    pub fn rows_for(&self, role: CacheRole) -> Option<usize> {
        self.extracted
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    pub label: String,
    pub output_path: PathBuf,
    pub extraction: PeriodExtraction,
}

/// Path of the per-period output file for `label` under `output_dir`.
pub fn period_output_path(output_dir: &Path, label: &str, options: &ExtractOptions) -> PathBuf {
    output_dir.join(format!("{label}{}", options.period_file_suffix))
}

/// Extract and normalize both pivot caches of the package at `path`.
pub fn extract_period_table(
    path: &Path,
    options: &ExtractOptions,
) -> Result<PeriodExtraction, ExtractError> {
    let mut pkg = PivotCachePackage::open_with_limits(path, options.limits).map_err(|source| {
        ExtractError::Open {
            path: path.to_path_buf(),
            source,
        }
    })?;
    log::info!(
        "{}: pivot caches present {:?}",
        path.display(),
        pkg.cache_ids()
    );
    extract_from_package(&mut pkg, options)
}

/// Extract both caches from an already opened package.
///
/// Each role is extracted independently: an absent or malformed cache is recorded as a
/// diagnostic and the other role still contributes its rows. Only when neither role yields
/// a table does extraction fail.
pub fn extract_from_package<R: Read + Seek>(
    pkg: &mut PivotCachePackage<R>,
    options: &ExtractOptions,
) -> Result<PeriodExtraction, ExtractError> {
    let first = definition_for_detection(pkg, options.main_cache_id);
    let second = definition_for_detection(pkg, options.outliers_cache_id);
    let roles = detect_roles(
        (options.main_cache_id, first.as_ref()),
        (options.outliers_cache_id, second.as_ref()),
    );

    let mut diagnostics = Vec::new();
    if roles.is_ambiguous() {
        diagnostics.push(ExtractionDiagnostic::RoleDetectionAmbiguous {
            assumed_main: roles.main,
            assumed_outliers: roles.outliers,
        });
    }
    log::info!(
        "main cache {}, outliers cache {} ({:?})",
        roles.main,
        roles.outliers,
        roles.detection
    );

    let mut rows = Vec::new();
    let mut extracted = Vec::new();
    for (role, cache_id) in roles.in_order() {
        let table = match pkg.read_table(cache_id) {
            Ok(CacheLookup::Present(table)) => table,
            Ok(CacheLookup::Absent(reason)) => {
                log::warn!("{role} cache {cache_id} absent: {reason}");
                diagnostics.push(ExtractionDiagnostic::CacheAbsent {
                    role,
                    cache_id,
                    reason,
                });
                continue;
            }
            Err(err) => {
                log::warn!("{role} cache {cache_id} could not be decoded: {err}");
                diagnostics.push(ExtractionDiagnostic::MalformedStructure {
                    role,
                    cache_id,
                    message: err.to_string(),
                });
                continue;
            }
        };

        let mut normalized = normalize(table, role);
        for row in &mut normalized.rows {
            row[Column::Source] = CacheValue::String(role.source_tag().to_string());
        }
        log::info!(
            "{role} cache {cache_id}: extracted {} records",
            normalized.rows.len()
        );

        extracted.push(RoleSummary {
            role,
            cache_id,
            rows: normalized.rows.len(),
            drift: normalized.drift,
        });
        rows.extend(normalized.rows);
    }

    if extracted.is_empty() {
        return Err(ExtractError::NoCacheExtracted { diagnostics });
    }

    Ok(PeriodExtraction {
        roles,
        table: PeriodTable::new(rows),
        extracted,
        diagnostics,
    })
}

/// Extract `input` and write its period table to `{output_dir}/{label}{suffix}`.
///
/// A partial extraction (one cache only) is still written. When no cache can be extracted
/// nothing is written and any existing output file is left as it was.
pub fn extract_period(
    input: &Path,
    output_dir: &Path,
    label: &str,
    options: &ExtractOptions,
) -> Result<ExtractionReport, ExtractError> {
    log::info!("extracting {} as {label}", input.display());
    let extraction = extract_period_table(input, options)?;

    let output_path = period_output_path(output_dir, label, options);
    atomic_write(&output_path, |file| {
        extraction.table.write_csv(file).map_err(ExtractError::from)
    })?;
    log::info!(
        "saved {} ({} rows)",
        output_path.display(),
        extraction.table.len()
    );

    Ok(ExtractionReport {
        label: label.to_string(),
        output_path,
        extraction,
    })
}

fn definition_for_detection<R: Read + Seek>(
    pkg: &mut PivotCachePackage<R>,
    cache_id: u32,
) -> Option<CacheDefinition> {
    match pkg.read_definition(cache_id) {
        Ok(lookup) => lookup.present(),
        Err(err) => {
            // The same error resurfaces as a diagnostic when the cache's table is read.
            log::warn!("cache {cache_id} definition unreadable during role detection: {err}");
            None
        }
    }
}
