use std::collections::BTreeMap;

use crate::definition::CacheDefinition;
use crate::records::PivotCacheRecordsReader;
use crate::{CacheValue, PivotCacheError};

/// Decoded contents of one pivot cache: the field names as a header plus literal rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTable {
    pub cache_id: u32,
    pub fields: Vec<String>,
    /// One entry per `<r>` record, in document order. Every row has `fields.len()` values.
    pub rows: Vec<Vec<CacheValue>>,
}

/// A borrowed view of one row, addressable by field name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    fields: &'a [String],
    values: &'a [CacheValue],
}

impl<'a> Row<'a> {
    pub fn get(&self, field: &str) -> Option<&'a CacheValue> {
        let idx = self.fields.iter().position(|f| f == field)?;
        self.values.get(idx)
    }

    pub fn values(&self) -> &'a [CacheValue] {
        self.values
    }

    pub fn to_map(&self) -> BTreeMap<String, CacheValue> {
        self.fields
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl CacheTable {
    pub fn new(cache_id: u32, fields: Vec<String>, rows: Vec<Vec<CacheValue>>) -> Self {
        Self {
            cache_id,
            fields,
            rows,
        }
    }

    /// Resolve every record from `reader` against `definition`.
    ///
    /// Entries are matched to fields by position. Shared item indices that fall outside the
    /// field's table resolve to [`CacheValue::Missing`]; a record shorter than the field list
    /// is padded the same way. A record with more entries than fields cannot be aligned and is
    /// reported as malformed.
    pub fn decode(
        cache_id: u32,
        definition: CacheDefinition,
        reader: &mut PivotCacheRecordsReader<'_>,
    ) -> Result<Self, PivotCacheError> {
        let field_count = definition.fields.len();
        let mut rows = Vec::new();
        let mut short_records = 0usize;

        while let Some(record) = reader.next_record()? {
            if record.len() > field_count {
                return Err(PivotCacheError::malformed(
                    reader.part(),
                    format!(
                        "record {} has {} entries but the cache defines {field_count} fields",
                        rows.len() + 1,
                        record.len()
                    ),
                ));
            }
            if record.len() < field_count {
                short_records += 1;
            }

            let mut row: Vec<CacheValue> = record
                .iter()
                .enumerate()
                .map(|(field_idx, entry)| entry.resolve(definition.shared_items(field_idx)))
                .collect();
            row.resize(field_count, CacheValue::Missing);
            rows.push(row);
        }

        if short_records > 0 {
            log::warn!(
                "{}: {short_records} record(s) had fewer entries than the {field_count} cache fields; padded with missing values",
                reader.part()
            );
        }
        let decoded = rows.len() as u64;
        if let Some(declared) = definition.record_count {
            if declared != decoded {
                log::warn!(
                    "pivot cache {cache_id}: definition declares {declared} records, decoded {decoded}"
                );
            }
        }
        if let Some(declared) = reader.declared_count() {
            if declared != decoded {
                log::warn!(
                    "{}: records part declares {declared} records, decoded {decoded}",
                    reader.part()
                );
            }
        }

        Ok(Self {
            cache_id,
            fields: definition.field_names(),
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }

    pub fn row(&self, idx: usize) -> Option<Row<'_>> {
        self.rows.get(idx).map(|values| Row {
            fields: &self.fields,
            values,
        })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        self.rows.iter().map(|values| Row {
            fields: &self.fields,
            values,
        })
    }
}
