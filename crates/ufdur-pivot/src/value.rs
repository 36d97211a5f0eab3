use std::fmt;

use crate::PivotCacheError;

/// A literal value stored in a pivot cache, either inline in a `<r>` record or in a field's
/// `<sharedItems>` table.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// `<m/>`, or any item with no literal to decode.
    Missing,
    /// `<n v="..."/>`
    Number(f64),
    /// `<s v="..."/>`, and the raw literal of any tag without a dedicated mapping.
    String(String),
    /// `<b v="0|1"/>`
    Bool(bool),
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::String(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::String(value)
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Number(value)
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Bool(value)
    }
}

/// Text rendering used for delimited output.
///
/// Numbers follow the shortest round-trip form of earlier UFDUR extracts: plain decimals with
/// a decimal point (`42.0`, `0.0001`) for magnitudes in `[1e-4, 1e16)`, otherwise an exponent
/// with an explicit sign and at least two digits (`1e+16`, `1.5e-07`). `NaN` renders empty like
/// a missing value and infinities as `inf`/`-inf`. Booleans render as `True`/`False`.
impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Missing => Ok(()),
            CacheValue::Number(n) => write_number(f, *n),
            CacheValue::String(s) => f.write_str(s),
            CacheValue::Bool(true) => f.write_str("True"),
            CacheValue::Bool(false) => f.write_str("False"),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        return Ok(());
    }
    if n.is_infinite() {
        return f.write_str(if n > 0.0 { "inf" } else { "-inf" });
    }
    if n == 0.0 || (1e-4..1e16).contains(&n.abs()) {
        return write!(f, "{n:?}");
    }

    // `{:e}` is already the shortest round-trip mantissa, e.g. `1.5e-7`.
    let sci = format!("{n:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    write!(f, "{mantissa}e{sign}{:02}", exp.unsigned_abs())
}

/// One positional entry of a `<r>` record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEntry {
    Literal(CacheValue),
    /// `<x v="..."/>`: a position in the owning field's shared item table.
    Index(u32),
}

impl RecordEntry {
    /// Resolve this entry against the shared items of the field at the same position.
    ///
    /// Indices into a field without shared items, or past the end of its table, resolve to
    /// [`CacheValue::Missing`].
    pub fn resolve(&self, shared_items: Option<&[CacheValue]>) -> CacheValue {
        match self {
            RecordEntry::Literal(value) => value.clone(),
            RecordEntry::Index(idx) => shared_items
                .and_then(|items| items.get(*idx as usize))
                .cloned()
                .unwrap_or(CacheValue::Missing),
        }
    }
}

/// Decode a literal item by tag (local name), shared by definitions and records.
///
/// Every tag has a mapping: `s`, `n`, `b` and `m` are typed; anything else keeps its raw
/// literal as a string (or [`CacheValue::Missing`] when it has none).
pub(crate) fn decode_literal(
    part: &str,
    tag: &[u8],
    raw: Option<String>,
) -> Result<CacheValue, PivotCacheError> {
    match tag {
        b"m" => Ok(CacheValue::Missing),
        b"s" => Ok(raw.map(CacheValue::String).unwrap_or(CacheValue::Missing)),
        b"n" => {
            let Some(raw) = raw else {
                return Err(PivotCacheError::malformed(part, "numeric item without a value"));
            };
            raw.trim()
                .parse::<f64>()
                .map(CacheValue::Number)
                .map_err(|_| PivotCacheError::malformed(part, format!("invalid number {raw:?}")))
        }
        b"b" => Ok(CacheValue::Bool(raw.as_deref().map(str::trim) == Some("1"))),
        _ => Ok(raw.map(CacheValue::String).unwrap_or(CacheValue::Missing)),
    }
}

/// Decode one record entry: `x` is an index, every other tag goes through [`decode_literal`].
pub(crate) fn decode_entry(
    part: &str,
    tag: &[u8],
    raw: Option<String>,
) -> Result<RecordEntry, PivotCacheError> {
    if tag != b"x" {
        return decode_literal(part, tag, raw).map(RecordEntry::Literal);
    }

    let Some(raw) = raw else {
        return Err(PivotCacheError::malformed(part, "shared item index without a value"));
    };
    raw.trim()
        .parse::<u32>()
        .map(RecordEntry::Index)
        .map_err(|_| PivotCacheError::malformed(part, format!("invalid shared item index {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const PART: &str = "xl/pivotCache/pivotCacheRecords1.xml";

    #[test]
    fn tag_mapping_is_total() {
        assert_eq!(
            decode_literal(PART, b"s", Some("AL".into())).unwrap(),
            CacheValue::String("AL".into())
        );
        assert_eq!(
            decode_literal(PART, b"n", Some(" 42 ".into())).unwrap(),
            CacheValue::Number(42.0)
        );
        assert_eq!(decode_literal(PART, b"b", Some("1".into())).unwrap(), CacheValue::Bool(true));
        assert_eq!(decode_literal(PART, b"b", Some("0".into())).unwrap(), CacheValue::Bool(false));
        assert_eq!(
            decode_literal(PART, b"b", Some("true".into())).unwrap(),
            CacheValue::Bool(false)
        );
        assert_eq!(decode_literal(PART, b"m", None).unwrap(), CacheValue::Missing);
        assert_eq!(
            decode_literal(PART, b"d", Some("2024-01-15T00:00:00".into())).unwrap(),
            CacheValue::String("2024-01-15T00:00:00".into())
        );
        assert_eq!(
            decode_literal(PART, b"e", Some("#N/A".into())).unwrap(),
            CacheValue::String("#N/A".into())
        );
        assert_eq!(decode_literal(PART, b"e", None).unwrap(), CacheValue::Missing);
        assert_eq!(decode_literal(PART, b"s", None).unwrap(), CacheValue::Missing);
    }

    #[test]
    fn invalid_number_is_malformed() {
        let err = decode_literal(PART, b"n", Some("abc".into())).unwrap_err();
        assert!(err.is_malformed(), "{err}");
        let err = decode_literal(PART, b"n", None).unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[test]
    fn index_entries_resolve_against_shared_items() {
        let items = vec![CacheValue::from("AL"), CacheValue::from("AR")];
        assert_eq!(RecordEntry::Index(1).resolve(Some(&items)), CacheValue::from("AR"));
        assert_eq!(RecordEntry::Index(2).resolve(Some(&items)), CacheValue::Missing);
        assert_eq!(RecordEntry::Index(0).resolve(None), CacheValue::Missing);
        assert_eq!(
            RecordEntry::Literal(CacheValue::Number(7.0)).resolve(Some(&items)),
            CacheValue::Number(7.0)
        );
    }

    #[test]
    fn x_tag_decodes_to_index() {
        assert_eq!(decode_entry(PART, b"x", Some("3".into())).unwrap(), RecordEntry::Index(3));
        assert!(decode_entry(PART, b"x", Some("-1".into())).unwrap_err().is_malformed());
        assert_eq!(
            decode_entry(PART, b"s", Some("DrugX".into())).unwrap(),
            RecordEntry::Literal(CacheValue::from("DrugX"))
        );
    }

    #[test]
    fn display_matches_extract_layout() {
        assert_eq!(CacheValue::Number(42.0).to_string(), "42.0");
        assert_eq!(CacheValue::Number(3.5).to_string(), "3.5");
        assert_eq!(CacheValue::Bool(true).to_string(), "True");
        assert_eq!(CacheValue::Missing.to_string(), "");
        assert_eq!(CacheValue::from("DrugX").to_string(), "DrugX");
    }

    #[test]
    fn display_uses_signed_exponents_outside_the_decimal_range() {
        let values = [1e16, 1.5e-7, -2.5e20, 1e-5, 1e300, 9999999999999998.0, 0.0001, -0.0];
        let rendered: Vec<String> = values
            .into_iter()
            .map(|n| CacheValue::Number(n).to_string())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "1e+16",
                "1.5e-07",
                "-2.5e+20",
                "1e-05",
                "1e+300",
                "9999999999999998.0",
                "0.0001",
                "-0.0",
            ]
        );
        assert_eq!(CacheValue::Number(f64::NAN).to_string(), "");
        assert_eq!(CacheValue::Number(f64::NEG_INFINITY).to_string(), "-inf");
    }
}
