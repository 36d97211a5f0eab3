//! UFDUR period tables: role detection, schema normalization and the multi-period master merge.
//!
//! An input workbook carries two pivot caches: the main per-claim-state dataset and an
//! outliers (orphans) roll-up. [`extract_period`] decodes both with [`ufdur_pivot`], works out
//! which is which ([`detect_roles`]), maps both onto the fixed 14-column schema ([`normalize`])
//! and writes one CSV period table. [`merge_periods`] rebuilds the master table from every
//! period table in a directory and reports per-quarter totals.
//!
//! Failures local to one cache are reported as [`ExtractionDiagnostic`]s next to whatever the
//! other cache produced. Only an extraction with no usable cache, or a merge with no period
//! tables, is an error.

mod error;
pub mod extract;
mod fs;
pub mod merge;
pub mod period;
pub mod roles;
pub mod schema;

pub use error::{ExtractError, MergeError};
pub use extract::{
    extract_from_package, extract_period, extract_period_table, period_output_path,
    ExtractOptions, ExtractionDiagnostic, ExtractionReport, PeriodExtraction, RoleSummary,
    DEFAULT_PERIOD_FILE_SUFFIX,
};
pub use merge::{
    discover_period_files, merge_periods, merge_periods_in_dir, summary_number, MasterTable,
    MergeOptions, MergeReport, PeriodSummary, QuarterSummary, DEFAULT_MASTER_FILE_NAME,
    DEFAULT_MASTER_MARKER,
};
pub use period::{default_output_label, period_label_from_file_name, PeriodTable};
pub use roles::{detect_roles, CacheRole, Detection, RoleAssignment, MAIN_DISCRIMINATOR_FIELD};
pub use schema::{
    canonical_header, normalize, CanonicalRow, Column, NormalizedTable, SchemaDrift,
    AGGREGATED_CLAIM_STATE, CANONICAL_WIDTH, LEGACY_RENAMES,
};
