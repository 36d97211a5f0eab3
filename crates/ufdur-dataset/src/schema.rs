//! The canonical UFDUR column set and normalization of pivot cache tables onto it.

use std::ops::{Index, IndexMut};

use ufdur_pivot::{CacheTable, CacheValue};

use crate::roles::CacheRole;

/// Columns of every normalized row, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Qtr,
    ClaimState,
    DodUfClass,
    Dsf,
    ProductName,
    SpecialtyDrugFlag,
    PointOfService,
    Mtf,
    MtfBranchOfService,
    TotalQty,
    TotalDs,
    TotalRxCnt,
    ThirtyDayEquiv,
    Source,
}

pub const CANONICAL_WIDTH: usize = 14;

impl Column {
    pub const ALL: [Column; CANONICAL_WIDTH] = [
        Column::Qtr,
        Column::ClaimState,
        Column::DodUfClass,
        Column::Dsf,
        Column::ProductName,
        Column::SpecialtyDrugFlag,
        Column::PointOfService,
        Column::Mtf,
        Column::MtfBranchOfService,
        Column::TotalQty,
        Column::TotalDs,
        Column::TotalRxCnt,
        Column::ThirtyDayEquiv,
        Column::Source,
    ];

    /// Header text as it appears in pivot caches and output files.
    pub fn name(self) -> &'static str {
        match self {
            Column::Qtr => "Qtr",
            Column::ClaimState => "ClaimState",
            Column::DodUfClass => "DOD_UF_CLASS",
            Column::Dsf => "DSF",
            Column::ProductName => "ProductName",
            Column::SpecialtyDrugFlag => "SpecialtyDrugFlag",
            Column::PointOfService => "point_of_service",
            Column::Mtf => "MTF",
            Column::MtfBranchOfService => "MTFbranchofservice",
            Column::TotalQty => "TotalQty",
            Column::TotalDs => "TotalDS",
            Column::TotalRxCnt => "TotalRxCnt",
            Column::ThirtyDayEquiv => "ThirtyDayEquiv",
            Column::Source => "Source",
        }
    }

    pub fn from_name(name: &str) -> Option<Column> {
        Column::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Value used when a source table has no such column.
    ///
    /// A missing `ClaimState` marks a pre-aggregated roll-up rather than a per-state row.
    pub fn backfill(self) -> CacheValue {
        match self {
            Column::ClaimState => CacheValue::String(AGGREGATED_CLAIM_STATE.to_string()),
            _ => CacheValue::String(String::new()),
        }
    }
}

pub const AGGREGATED_CLAIM_STATE: &str = "AGGREGATED";

/// Header row of every period and master table.
pub fn canonical_header() -> [&'static str; CANONICAL_WIDTH] {
    Column::ALL.map(Column::name)
}

/// Legacy outlier-cache column names and their canonical replacements.
pub const LEGACY_RENAMES: [(&str, Column); 4] = [
    ("TotalOrphanQTY", Column::TotalQty),
    ("TotalOrphanDS", Column::TotalDs),
    ("TotalOrphanRxCnt", Column::TotalRxCnt),
    ("TotalOrphanThirtyDayEquiv", Column::ThirtyDayEquiv),
];

fn canonical_name(field: &str) -> &str {
    LEGACY_RENAMES
        .iter()
        .find(|(legacy, _)| *legacy == field)
        .map(|(_, column)| column.name())
        .unwrap_or(field)
}

/// A row with exactly the canonical columns, in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow([CacheValue; CANONICAL_WIDTH]);

impl CanonicalRow {
    pub fn new(values: [CacheValue; CANONICAL_WIDTH]) -> Self {
        Self(values)
    }

    /// A row with every column back-filled.
    pub fn backfilled() -> Self {
        Self(Column::ALL.map(Column::backfill))
    }

    pub fn get(&self, name: &str) -> Option<&CacheValue> {
        Column::from_name(name).map(|c| &self[c])
    }

    pub fn values(&self) -> &[CacheValue; CANONICAL_WIDTH] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &CacheValue)> + '_ {
        Column::ALL.into_iter().zip(self.0.iter())
    }
}

impl Index<Column> for CanonicalRow {
    type Output = CacheValue;

    fn index(&self, column: Column) -> &CacheValue {
        &self.0[column.index()]
    }
}

impl IndexMut<Column> for CanonicalRow {
    fn index_mut(&mut self, column: Column) -> &mut CacheValue {
        &mut self.0[column.index()]
    }
}

/// What normalization changed relative to the source header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDrift {
    /// `(source name, canonical name)` for every legacy rename applied.
    pub renamed: Vec<(String, &'static str)>,
    /// Canonical columns absent from the source, in canonical order.
    pub backfilled: Vec<Column>,
    /// Source columns with no place in the canonical schema (including duplicates).
    pub dropped: Vec<String>,
}

impl SchemaDrift {
    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty() && self.backfilled.is_empty() && self.dropped.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub role: CacheRole,
    pub cache_id: u32,
    pub rows: Vec<CanonicalRow>,
    pub drift: SchemaDrift,
}

/// Map a decoded cache table onto the canonical schema.
///
/// Legacy outlier names are renamed first, so both caches become column-compatible. Columns
/// are then matched by name, which makes the result independent of source column order:
/// missing columns are back-filled (`ClaimState` with `"AGGREGATED"`, everything else with an
/// empty string) and unknown columns are dropped. When renaming produces the same name twice,
/// the first source column wins. An existing `Source` column is carried through unchanged;
/// tagging rows by role is the caller's job.
pub fn normalize(table: CacheTable, role: CacheRole) -> NormalizedTable {
    let CacheTable {
        cache_id,
        fields,
        rows,
    } = table;

    let mut drift = SchemaDrift::default();
    let mut source_index: [Option<usize>; CANONICAL_WIDTH] = [None; CANONICAL_WIDTH];

    for (idx, field) in fields.iter().enumerate() {
        let name = canonical_name(field);
        let Some(column) = Column::from_name(name) else {
            drift.dropped.push(field.clone());
            continue;
        };
        if name != field.as_str() {
            drift.renamed.push((field.clone(), column.name()));
        }
        let slot = &mut source_index[column.index()];
        if slot.is_some() {
            log::warn!(
                "{role} cache {cache_id}: column {field:?} duplicates {:?} after renaming; keeping the first",
                column.name()
            );
            drift.dropped.push(field.clone());
        } else {
            *slot = Some(idx);
        }
    }
    drift.backfilled = Column::ALL
        .into_iter()
        .filter(|c| source_index[c.index()].is_none())
        .collect();

    if !drift.is_empty() {
        log::debug!(
            "{role} cache {cache_id}: renamed {:?}, back-filled {:?}, dropped {:?}",
            drift.renamed,
            drift.backfilled,
            drift.dropped
        );
    }

    let rows = rows
        .into_iter()
        .map(|mut values| {
            CanonicalRow(Column::ALL.map(|column| match source_index[column.index()] {
                Some(idx) => values
                    .get_mut(idx)
                    .map(|v| std::mem::replace(v, CacheValue::Missing))
                    .unwrap_or(CacheValue::Missing),
                None => column.backfill(),
            }))
        })
        .collect();

    NormalizedTable {
        role,
        cache_id,
        rows,
        drift,
    }
}
