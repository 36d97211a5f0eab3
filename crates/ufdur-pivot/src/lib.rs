//! Pivot cache extraction for spreadsheet packages.
//!
//! Excel keeps a deduplicated copy of a pivot table's source data inside the package:
//!
//! - `xl/pivotCache/pivotCacheDefinition{N}.xml` lists the cache fields and, per field, an
//!   optional `<sharedItems>` dictionary of distinct values.
//! - `xl/pivotCache/pivotCacheRecords{N}.xml` holds one `<r>` per source row. Each entry is
//!   either an inline literal or an `<x v="..."/>` index into the field's dictionary.
//!
//! [`PivotCachePackage::read_table`] reads both parts for a cache identifier and resolves every
//! record into literal [`CacheValue`]s. A cache that is not present in the package is a normal
//! outcome ([`CacheLookup::Absent`]), not an error: workbooks carry a variable number of caches.

mod error;
pub mod definition;
pub mod package;
pub mod records;
pub mod table;
pub mod value;

pub use definition::{CacheDefinition, CacheField};
pub use error::PivotCacheError;
pub use package::{
    definition_part_name, records_part_name, PackageLimits, PivotCachePackage,
    DEFAULT_MAX_PART_BYTES,
};
pub use records::PivotCacheRecordsReader;
pub use table::{CacheTable, Row};
pub use value::{CacheValue, RecordEntry};

/// Why a cache could not be read from a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentReason {
    MissingDefinition,
    MissingRecords,
    MissingBoth,
}

impl std::fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AbsentReason::MissingDefinition => "no cache definition part",
            AbsentReason::MissingRecords => "no cache records part",
            AbsentReason::MissingBoth => "no cache definition or records part",
        })
    }
}

/// Outcome of looking up a cache by identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Present(T),
    Absent(AbsentReason),
}

impl<T> CacheLookup<T> {
    pub fn present(self) -> Option<T> {
        match self {
            CacheLookup::Present(value) => Some(value),
            CacheLookup::Absent(_) => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CacheLookup::Absent(_))
    }
}
