use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use crate::definition::CacheDefinition;
use crate::records::PivotCacheRecordsReader;
use crate::table::CacheTable;
use crate::{AbsentReason, CacheLookup, PivotCacheError};

/// Default maximum uncompressed size permitted for any single pivot cache part.
///
/// Guards against ZIP bombs and forged `uncompressed_size` metadata.
pub const DEFAULT_MAX_PART_BYTES: u64 = 256 * 1024 * 1024; // 256MiB

const PIVOT_CACHE_DIR: &str = "xl/pivotCache/";
const DEFINITION_STEM: &str = "pivotCacheDefinition";
const RECORDS_STEM: &str = "pivotCacheRecords";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    pub max_part_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
        }
    }
}

/// Part name of the definition for cache `cache_id`, e.g. `xl/pivotCache/pivotCacheDefinition1.xml`.
pub fn definition_part_name(cache_id: u32) -> String {
    format!("{PIVOT_CACHE_DIR}{DEFINITION_STEM}{cache_id}.xml")
}

/// Part name of the records for cache `cache_id`, e.g. `xl/pivotCache/pivotCacheRecords1.xml`.
pub fn records_part_name(cache_id: u32) -> String {
    format!("{PIVOT_CACHE_DIR}{RECORDS_STEM}{cache_id}.xml")
}

/// A spreadsheet package opened for pivot cache extraction.
///
/// Parts are inflated on demand; nothing beyond the zip central directory is read up front.
pub struct PivotCachePackage<R: Read + Seek> {
    archive: ZipArchive<R>,
    limits: PackageLimits,
}

impl PivotCachePackage<BufReader<File>> {
    pub fn open_with_limits(
        path: impl AsRef<Path>,
        limits: PackageLimits,
    ) -> Result<Self, PivotCacheError> {
        let file = File::open(path)?;
        Self::from_reader_with_limits(BufReader::new(file), limits)
    }
}

impl PivotCachePackage<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, PivotCacheError> {
        Self::from_reader(Cursor::new(bytes.into()))
    }
}

impl<R: Read + Seek> PivotCachePackage<R> {
    pub fn from_reader(reader: R) -> Result<Self, PivotCacheError> {
        Self::from_reader_with_limits(reader, PackageLimits::default())
    }

    pub fn from_reader_with_limits(
        reader: R,
        limits: PackageLimits,
    ) -> Result<Self, PivotCacheError> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
            limits,
        })
    }

    /// Identifiers of every pivot cache definition part in the package, ascending.
    pub fn cache_ids(&self) -> BTreeSet<u32> {
        self.archive
            .file_names()
            .filter_map(parse_definition_cache_id)
            .collect()
    }

    pub fn has_part(&self, name: &str) -> bool {
        find_part_index(&self.archive, name).is_some()
    }

    /// Read a part by name, returning `Ok(None)` when the package has no such entry.
    pub fn read_part(&mut self, name: &str) -> Result<Option<Vec<u8>>, PivotCacheError> {
        let Some(idx) = find_part_index(&self.archive, name) else {
            return Ok(None);
        };
        let mut file = match self.archive.by_index(idx) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if file.is_dir() {
            return Ok(None);
        }
        let declared_size = file.size();
        read_bytes_with_limit(&mut file, declared_size, name, self.limits.max_part_bytes).map(Some)
    }

    /// Read and parse the definition of cache `cache_id`.
    ///
    /// A package without that definition part yields [`CacheLookup::Absent`], not an error.
    pub fn read_definition(
        &mut self,
        cache_id: u32,
    ) -> Result<CacheLookup<CacheDefinition>, PivotCacheError> {
        let part = definition_part_name(cache_id);
        match self.read_part(&part)? {
            Some(bytes) => CacheDefinition::parse(&part, &bytes).map(CacheLookup::Present),
            None => Ok(CacheLookup::Absent(AbsentReason::MissingDefinition)),
        }
    }

    /// Decode cache `cache_id` into a table.
    ///
    /// Both the definition and the records part must exist: a definition without records (or
    /// the reverse) is reported as [`CacheLookup::Absent`] before either is parsed.
    pub fn read_table(&mut self, cache_id: u32) -> Result<CacheLookup<CacheTable>, PivotCacheError> {
        let def_part = definition_part_name(cache_id);
        let rec_part = records_part_name(cache_id);
        let reason = match (self.has_part(&def_part), self.has_part(&rec_part)) {
            (true, true) => None,
            (false, true) => Some(AbsentReason::MissingDefinition),
            (true, false) => Some(AbsentReason::MissingRecords),
            (false, false) => Some(AbsentReason::MissingBoth),
        };
        if let Some(reason) = reason {
            return Ok(CacheLookup::Absent(reason));
        }

        let definition = match self.read_definition(cache_id)? {
            CacheLookup::Present(definition) => definition,
            CacheLookup::Absent(reason) => return Ok(CacheLookup::Absent(reason)),
        };
        let Some(records) = self.read_part(&rec_part)? else {
            return Ok(CacheLookup::Absent(AbsentReason::MissingRecords));
        };

        let mut reader = PivotCacheRecordsReader::new(&rec_part, &records);
        CacheTable::decode(cache_id, definition, &mut reader).map(CacheLookup::Present)
    }
}

fn parse_definition_cache_id(name: &str) -> Option<u32> {
    let name = name.trim_start_matches(['/', '\\']).replace('\\', "/");
    let lower = name.to_ascii_lowercase();
    let rest = lower.strip_prefix(&PIVOT_CACHE_DIR.to_ascii_lowercase())?;
    let rest = rest.strip_prefix(&DEFINITION_STEM.to_ascii_lowercase())?;
    let digits = rest.strip_suffix(".xml")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Locate a ZIP entry by name, tolerating common producer mistakes:
/// - leading `/` mismatch
/// - Windows-style `\` path separators
/// - ASCII case differences and percent-encoding
///
/// An exact match wins over a slash variant, which wins over a normalized match.
fn find_part_index<R: Read + Seek>(archive: &ZipArchive<R>, name: &str) -> Option<usize> {
    fn is_alt_slash_variant(entry: &str, name: &str) -> bool {
        if let Some(stripped) = name.strip_prefix('/') {
            entry == stripped
        } else {
            entry.strip_prefix('/').is_some_and(|rest| rest == name)
        }
    }

    let mut candidate = None::<(usize, u8)>;
    for (idx, entry) in archive.file_names().enumerate() {
        if entry == name {
            return Some(idx);
        }
        if is_alt_slash_variant(entry, name) {
            candidate = Some((idx, 2));
            continue;
        }
        if part_names_equivalent(entry, name)
            && candidate.as_ref().map_or(true, |(_, score)| *score < 1)
        {
            candidate = Some((idx, 1));
        }
    }

    candidate.map(|(idx, _)| idx)
}

fn part_name_key(name: &str) -> Vec<u8> {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let mut bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut in_leading_separators = true;
    while let Some(&b) = bytes.first() {
        let decoded = match bytes {
            [b'%', hi, lo, ..] => match (hex_val(*hi), hex_val(*lo)) {
                (Some(hi), Some(lo)) => {
                    bytes = &bytes[3..];
                    (hi << 4) | lo
                }
                _ => {
                    bytes = &bytes[1..];
                    b
                }
            },
            _ => {
                bytes = &bytes[1..];
                b
            }
        };

        if in_leading_separators && matches!(decoded, b'/' | b'\\') {
            continue;
        }
        in_leading_separators = false;

        out.push(if decoded == b'\\' {
            b'/'
        } else {
            decoded.to_ascii_lowercase()
        });
    }
    out
}

fn part_names_equivalent(a: &str, b: &str) -> bool {
    part_name_key(a) == part_name_key(b)
}

/// Read a ZIP entry into memory with an uncompressed size limit.
///
/// The declared size is checked first, then the read itself is capped at `max_bytes + 1` so
/// forged metadata cannot push past the limit.
fn read_bytes_with_limit(
    reader: impl Read,
    declared_size: u64,
    part: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, PivotCacheError> {
    if declared_size > max_bytes {
        return Err(PivotCacheError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_bytes,
        });
    }

    let mut buf = Vec::new();
    let read_limit = max_bytes.checked_add(1).unwrap_or(u64::MAX);
    reader.take(read_limit).read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > max_bytes {
        return Err(PivotCacheError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_bytes,
        });
    }

    Ok(buf)
}
