use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use crate::value::decode_entry;
use crate::{PivotCacheError, RecordEntry};

/// Streaming reader for `xl/pivotCache/pivotCacheRecords*.xml`.
///
/// Namespace-insensitive (matches local names) and never builds a DOM, so caches with
/// hundreds of thousands of records stay cheap. Every element child of an `<r>` occupies one
/// field position, including tags without a dedicated mapping.
pub struct PivotCacheRecordsReader<'a> {
    part: &'a str,
    reader: Reader<&'a [u8]>,
    buf: Vec<u8>,
    skip_buf: Vec<u8>,
    declared_count: Option<u64>,
    done: bool,
}

impl<'a> PivotCacheRecordsReader<'a> {
    pub fn new(part: &'a str, bytes: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        Self {
            part,
            reader,
            buf: Vec::new(),
            skip_buf: Vec::new(),
            declared_count: None,
            done: false,
        }
    }

    pub fn part(&self) -> &str {
        self.part
    }

    /// `pivotCacheRecords@count`, available once the root element has been read.
    pub fn declared_count(&self) -> Option<u64> {
        self.declared_count
    }

    /// Return the next `<r>` record, or `Ok(None)` at end of input.
    pub fn next_record(&mut self) -> Result<Option<Vec<RecordEntry>>, PivotCacheError> {
        if self.done {
            return Ok(None);
        }

        loop {
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(ev) => ev,
                Err(err) => {
                    self.done = true;
                    return Err(err.into());
                }
            };

            match event {
                Event::Start(e) if e.local_name().as_ref() == b"r" => {
                    drop(e);
                    self.buf.clear();
                    return self.read_record().map(Some);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"r" => {
                    drop(e);
                    self.buf.clear();
                    return Ok(Some(Vec::new()));
                }
                Event::Start(e) | Event::Empty(e)
                    if e.local_name().as_ref() == b"pivotCacheRecords" =>
                {
                    self.declared_count =
                        attr_value_local(&e, b"count")?.and_then(|v| v.trim().parse().ok());
                }
                Event::Eof => {
                    self.done = true;
                    self.buf.clear();
                    return Ok(None);
                }
                _ => {}
            }

            self.buf.clear();
        }
    }

    /// Parse all remaining records into memory.
    pub fn parse_all_records(&mut self) -> Result<Vec<Vec<RecordEntry>>, PivotCacheError> {
        let mut out = Vec::new();
        while let Some(record) = self.next_record()? {
            out.push(record);
        }
        Ok(out)
    }

    fn read_record(&mut self) -> Result<Vec<RecordEntry>, PivotCacheError> {
        let mut entries = Vec::new();

        loop {
            let event = self.reader.read_event_into(&mut self.buf)?;
            match event {
                Event::Empty(e) => {
                    let tag = e.local_name().as_ref().to_vec();
                    let raw = attr_value_local(&e, b"v")?;
                    entries.push(decode_entry(self.part, &tag, raw)?);
                }
                Event::Start(e) => {
                    let e = e.into_owned();
                    self.buf.clear();
                    let raw = match attr_value_local(&e, b"v")? {
                        Some(v) => {
                            self.skip_to_end(e.name())?;
                            Some(v)
                        }
                        None => self.read_value_text_from_element(e.name())?,
                    };
                    entries.push(decode_entry(self.part, e.local_name().as_ref(), raw)?);
                }
                Event::End(e) if e.local_name().as_ref() == b"r" => break,
                Event::Eof => {
                    self.done = true;
                    return Err(PivotCacheError::malformed(self.part, "unterminated <r> record"));
                }
                _ => {}
            }

            self.buf.clear();
        }

        self.buf.clear();
        Ok(entries)
    }

    /// Text of a value written as `<n><v>42</v></n>` or `<s>Hello</s>`.
    fn read_value_text_from_element(
        &mut self,
        outer_end: QName<'_>,
    ) -> Result<Option<String>, PivotCacheError> {
        let mut value: Option<String> = None;

        loop {
            let event = self.reader.read_event_into(&mut self.buf)?;
            match event {
                Event::Start(e) => {
                    let e = e.into_owned();
                    self.buf.clear();
                    if e.local_name().as_ref() == b"v" {
                        let v = self.read_text_to_end(e.name())?;
                        value.get_or_insert(v);
                    } else {
                        self.skip_to_end(e.name())?;
                    }
                }
                Event::Empty(e) if e.local_name().as_ref() == b"v" => {
                    value.get_or_insert_with(String::new);
                }
                Event::Text(e) if value.is_none() => {
                    let text = e.unescape()?;
                    if !text.trim().is_empty() {
                        value = Some(text.into_owned());
                    }
                }
                Event::CData(e) if value.is_none() => {
                    let text = decode_utf8(self.part, &e)?;
                    if !text.trim().is_empty() {
                        value = Some(text.to_string());
                    }
                }
                Event::End(e) if e.name() == outer_end => break,
                Event::Eof => {
                    self.done = true;
                    return Err(PivotCacheError::malformed(self.part, "unterminated record value"));
                }
                _ => {}
            }

            self.buf.clear();
        }

        self.buf.clear();
        Ok(value)
    }

    fn read_text_to_end(&mut self, end: QName<'_>) -> Result<String, PivotCacheError> {
        let mut text = String::new();

        loop {
            let event = self.reader.read_event_into(&mut self.buf)?;
            match event {
                Event::Text(e) => text.push_str(&e.unescape()?),
                Event::CData(e) => text.push_str(decode_utf8(self.part, &e)?),
                Event::Start(e) => {
                    let e = e.into_owned();
                    self.buf.clear();
                    self.skip_to_end(e.name())?;
                }
                Event::End(e) if e.name() == end => break,
                Event::Eof => {
                    self.done = true;
                    return Err(PivotCacheError::malformed(self.part, "unterminated <v> value"));
                }
                _ => {}
            }

            self.buf.clear();
        }

        self.buf.clear();
        Ok(text)
    }

    fn skip_to_end(&mut self, end: QName<'_>) -> Result<(), PivotCacheError> {
        self.skip_buf.clear();
        self.reader.read_to_end_into(end, &mut self.skip_buf)?;
        Ok(())
    }
}

/// Value of the first attribute whose local name is `key`.
///
/// Attributes that cannot be parsed or decoded are errors, not absent values: a `<s>` with an
/// undecodable `v` must not read as a missing item.
fn attr_value_local(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, PivotCacheError> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.local_name().as_ref() != key {
            continue;
        }
        return Ok(Some(attr.unescape_value()?.into_owned()));
    }
    Ok(None)
}

fn decode_utf8<'b>(part: &str, bytes: &'b [u8]) -> Result<&'b str, PivotCacheError> {
    std::str::from_utf8(bytes).map_err(|source| PivotCacheError::Utf8 {
        part: part.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::CacheValue;

    const PART: &str = "xl/pivotCache/pivotCacheRecords1.xml";

    fn lit(value: impl Into<CacheValue>) -> RecordEntry {
        RecordEntry::Literal(value.into())
    }

    #[test]
    fn parses_record_item_tag_variants() {
        let xml = r##"
            <pivotCacheRecords xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1">
              <r>
                <m/>
                <b v="1"/>
                <b v="0"/>
                <e v="#DIV/0!"/>
                <n v="42"/>
                <n>42</n>
                <s v="Hello"/>
                <s>Hello</s>
                <x v="3"/>
                <d v="2024-01-15T00:00:00"/>
              </r>
            </pivotCacheRecords>
        "##;

        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        let records = reader.parse_all_records().unwrap();

        assert_eq!(
            records,
            vec![vec![
                RecordEntry::Literal(CacheValue::Missing),
                lit(true),
                lit(false),
                lit("#DIV/0!"),
                lit(42.0),
                lit(42.0),
                lit("Hello"),
                lit("Hello"),
                RecordEntry::Index(3),
                lit("2024-01-15T00:00:00"),
            ]]
        );
        assert_eq!(reader.declared_count(), Some(1));
    }

    #[test]
    fn parses_namespace_prefixed_and_wrapped_values() {
        let xml = r#"
            <pc:pivotCacheRecords xmlns:pc="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
              <pc:r>
                <pc:x><pc:v>1</pc:v></pc:x>
                <pc:s>World</pc:s>
                <pc:m></pc:m>
              </pc:r>
              <pc:r/>
            </pc:pivotCacheRecords>
        "#;

        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        let records = reader.parse_all_records().unwrap();

        assert_eq!(
            records,
            vec![
                vec![
                    RecordEntry::Index(1),
                    lit("World"),
                    RecordEntry::Literal(CacheValue::Missing),
                ],
                vec![],
            ]
        );
        assert_eq!(reader.declared_count(), None);
    }

    #[test]
    fn unknown_tags_keep_their_field_position() {
        let xml = r#"<pivotCacheRecords><r><x v="0"/><foo v="raw"/><bar/><n v="1"/></r></pivotCacheRecords>"#;
        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        let records = reader.parse_all_records().unwrap();
        assert_eq!(
            records,
            vec![vec![
                RecordEntry::Index(0),
                lit("raw"),
                RecordEntry::Literal(CacheValue::Missing),
                lit(1.0),
            ]]
        );
    }

    #[test]
    fn truncated_records_are_malformed() {
        let xml = r#"<pivotCacheRecords><r><n v="1"/>"#;
        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        let err = reader.parse_all_records().unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[test]
    fn undecodable_attribute_value_is_malformed() {
        let xml = b"<pivotCacheRecords><r><s v=\"Drug\xffX\"/><n v=\"1\"/></r></pivotCacheRecords>";
        let mut reader = PivotCacheRecordsReader::new(PART, xml);
        let err = reader.parse_all_records().unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[test]
    fn undecodable_cdata_is_malformed() {
        let xml = b"<pivotCacheRecords><r><s><![CDATA[Drug\xffX]]></s></r></pivotCacheRecords>";
        let mut reader = PivotCacheRecordsReader::new(PART, xml);
        let err = reader.parse_all_records().unwrap_err();
        assert!(matches!(err, PivotCacheError::Utf8 { .. }), "{err}");
    }

    #[test]
    fn cdata_values_are_read() {
        let xml = r#"<pivotCacheRecords><r><s><![CDATA[a < b]]></s></r></pivotCacheRecords>"#;
        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        assert_eq!(reader.parse_all_records().unwrap(), vec![vec![lit("a < b")]]);
    }

    #[test]
    fn bad_index_is_malformed() {
        let xml = r#"<pivotCacheRecords><r><x v="first"/></r></pivotCacheRecords>"#;
        let mut reader = PivotCacheRecordsReader::new(PART, xml.as_bytes());
        let err = reader.parse_all_records().unwrap_err();
        assert!(matches!(err, PivotCacheError::Malformed { .. }), "{err}");
    }
}
