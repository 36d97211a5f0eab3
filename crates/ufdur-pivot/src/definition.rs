use roxmltree::{Document, Node};

use crate::value::decode_literal;
use crate::{CacheValue, PivotCacheError};

/// One `<cacheField>` of a pivot cache definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheField {
    pub name: String,
    /// Values of `<sharedItems>`, addressed by `<x v="..."/>` record entries.
    ///
    /// `None` when the field has no `<sharedItems>` element. An element without item children
    /// (common for numeric fields that only carry `containsNumber`-style attributes) yields an
    /// empty table.
    pub shared_items: Option<Vec<CacheValue>>,
}

/// Parsed `xl/pivotCache/pivotCacheDefinition*.xml`.
///
/// Field order matches the positional order of entries in every `<r>` record of the
/// corresponding records part.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheDefinition {
    pub fields: Vec<CacheField>,
    /// `pivotCacheDefinition@recordCount`, when present.
    pub record_count: Option<u64>,
}

impl CacheDefinition {
    pub fn parse(part: &str, xml: &[u8]) -> Result<Self, PivotCacheError> {
        let text = std::str::from_utf8(xml).map_err(|source| PivotCacheError::Utf8 {
            part: part.to_string(),
            source,
        })?;
        let doc = Document::parse(text)?;

        let root = doc.root_element();
        if root.tag_name().name() != "pivotCacheDefinition" {
            return Err(PivotCacheError::malformed(
                part,
                format!("unexpected root element <{}>", root.tag_name().name()),
            ));
        }
        let record_count = attr_local(root, "recordCount").and_then(|v| v.trim().parse().ok());

        let mut fields = Vec::new();
        for field in root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "cacheField")
        {
            let Some(name) = attr_local(field, "name") else {
                return Err(PivotCacheError::malformed(part, "cacheField without a name"));
            };

            let shared_items = match child_element(field, "sharedItems") {
                Some(items) => Some(
                    items
                        .children()
                        .filter(Node::is_element)
                        .map(|item| {
                            decode_literal(
                                part,
                                item.tag_name().name().as_bytes(),
                                item_literal(item),
                            )
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => None,
            };

            fields.push(CacheField {
                name: name.to_string(),
                shared_items,
            });
        }

        Ok(Self {
            fields,
            record_count,
        })
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Shared items of the field at `field_idx`, if that field has a dictionary.
    pub fn shared_items(&self, field_idx: usize) -> Option<&[CacheValue]> {
        self.fields
            .get(field_idx)
            .and_then(|f| f.shared_items.as_deref())
    }
}

/// Attribute lookup by local name, so prefixed attributes (`pc:name`) still match.
fn attr_local<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name() == name)
        .map(|a| a.value())
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// The literal of a shared item: its `v` attribute, else a `<v>` child, else its own text.
fn item_literal(item: Node<'_, '_>) -> Option<String> {
    if let Some(v) = attr_local(item, "v") {
        return Some(v.to_string());
    }
    if let Some(v) = child_element(item, "v") {
        return Some(v.text().unwrap_or_default().to_string());
    }
    item.text()
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const PART: &str = "xl/pivotCache/pivotCacheDefinition1.xml";

    #[test]
    fn parses_fields_and_shared_items() {
        let xml = r##"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<pivotCacheDefinition xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" recordCount="3">
  <cacheSource type="worksheet"><worksheetSource ref="A1:C4" sheet="Data"/></cacheSource>
  <cacheFields count="3">
    <cacheField name="ClaimState" numFmtId="0">
      <sharedItems count="3">
        <s v="AL"/>
        <s v="AR"/>
        <m/>
      </sharedItems>
    </cacheField>
    <cacheField name="SpecialtyDrugFlag">
      <sharedItems>
        <b v="1"/>
        <b v="0"/>
        <n v="2.5"/>
        <e v="#N/A"/>
      </sharedItems>
    </cacheField>
    <cacheField name="TotalQty" numFmtId="0">
      <sharedItems containsSemiMixedTypes="0" containsString="0" containsNumber="1"/>
    </cacheField>
    <cacheField name="Qtr"/>
  </cacheFields>
</pivotCacheDefinition>"##;

        let def = CacheDefinition::parse(PART, xml.as_bytes()).unwrap();
        assert_eq!(def.record_count, Some(3));
        assert_eq!(
            def.field_names(),
            vec!["ClaimState", "SpecialtyDrugFlag", "TotalQty", "Qtr"]
        );
        assert_eq!(
            def.shared_items(0).unwrap(),
            &[CacheValue::from("AL"), CacheValue::from("AR"), CacheValue::Missing]
        );
        assert_eq!(
            def.shared_items(1).unwrap(),
            &[
                CacheValue::Bool(true),
                CacheValue::Bool(false),
                CacheValue::Number(2.5),
                CacheValue::from("#N/A"),
            ]
        );
        assert_eq!(def.shared_items(2), Some(&[][..]));
        assert_eq!(def.shared_items(3), None);
        assert!(def.has_field("ClaimState"));
        assert!(!def.has_field("MTF"));
    }

    #[test]
    fn parses_namespace_prefixed_and_text_forms() {
        let xml = r#"<pc:pivotCacheDefinition xmlns:pc="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <pc:cacheFields>
    <pc:cacheField name="ProductName">
      <pc:sharedItems>
        <pc:s>DrugX</pc:s>
        <pc:n><pc:v>10</pc:v></pc:n>
      </pc:sharedItems>
    </pc:cacheField>
  </pc:cacheFields>
</pc:pivotCacheDefinition>"#;

        let def = CacheDefinition::parse(PART, xml.as_bytes()).unwrap();
        assert_eq!(def.field_names(), vec!["ProductName"]);
        assert_eq!(
            def.shared_items(0).unwrap(),
            &[CacheValue::from("DrugX"), CacheValue::Number(10.0)]
        );
    }

    #[test]
    fn group_items_are_not_shared_items() {
        let xml = r#"<pivotCacheDefinition xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <cacheFields>
    <cacheField name="Qtr">
      <sharedItems><s v="FY24Q1"/></sharedItems>
      <fieldGroup base="0"><groupItems><s v="Grouped"/></groupItems></fieldGroup>
    </cacheField>
  </cacheFields>
</pivotCacheDefinition>"#;

        let def = CacheDefinition::parse(PART, xml.as_bytes()).unwrap();
        assert_eq!(def.shared_items(0).unwrap(), &[CacheValue::from("FY24Q1")]);
    }

    #[test]
    fn malformed_definitions_are_reported() {
        let err = CacheDefinition::parse(PART, b"<pivotCacheDefinition><cacheFields>").unwrap_err();
        assert!(err.is_malformed(), "{err}");

        let err = CacheDefinition::parse(PART, b"<worksheet/>").unwrap_err();
        assert!(matches!(err, PivotCacheError::Malformed { .. }), "{err}");

        let xml = br#"<pivotCacheDefinition><cacheFields><cacheField><sharedItems/></cacheField></cacheFields></pivotCacheDefinition>"#;
        let err = CacheDefinition::parse(PART, xml).unwrap_err();
        assert!(err.is_malformed(), "{err}");

        let xml = br#"<pivotCacheDefinition><cacheFields><cacheField name="TotalQty"><sharedItems><n v="x"/></sharedItems></cacheField></cacheFields></pivotCacheDefinition>"#;
        let err = CacheDefinition::parse(PART, xml).unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }
}
