//! Structured differences between two schema contents
//!
//! Used to explain ID collisions and compatibility rejections. Avro and JSON
//! Schema documents are compared field by field; anything that does not parse
//! as JSON (Protobuf IDL) falls back to a line diff.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::schema::SchemaType;

/// A field present on both sides whose declared type differs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub field: String,
    pub source_type: String,
    pub destination_type: String,
}

/// A top-level attribute (type, name, namespace) that differs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub attribute: String,
    pub source: Option<String>,
    pub destination: Option<String>,
}

/// One line of a textual fallback diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    /// `true` when the line only exists in the source content
    pub in_source: bool,
    pub line: String,
}

/// Difference between a source schema and a destination schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub only_in_source: Vec<String>,
    pub only_in_destination: Vec<String>,
    /// Source-only fields a reader of the destination data could not fill:
    /// Avro fields without a `default`, JSON Schema properties listed as `required`
    pub source_fields_without_default: Vec<String>,
    pub type_changes: Vec<TypeChange>,
    pub mismatches: Vec<Mismatch>,
    pub line_changes: Vec<LineChange>,
}

impl SchemaDiff {
    /// Diff `source` against `destination`
    pub fn between(source: &str, destination: &str, schema_type: SchemaType) -> Self {
        if schema_type.is_json_encoded() {
            if let (Ok(src), Ok(dst)) = (
                serde_json::from_str::<Value>(source),
                serde_json::from_str::<Value>(destination),
            ) {
                return match schema_type {
                    SchemaType::Json => Self::json_schema(&src, &dst),
                    _ => Self::avro(&src, &dst),
                };
            }
        }
        Self::text(source, destination)
    }

    pub fn is_empty(&self) -> bool {
        self.only_in_source.is_empty()
            && self.only_in_destination.is_empty()
            && self.type_changes.is_empty()
            && self.mismatches.is_empty()
            && self.line_changes.is_empty()
    }

    /// Whether registering the source after the destination would break
    /// readers: removed fields, type changes, renamed records, or new fields
    /// without defaults. Line-level differences are not judged.
    pub fn breaks_compatibility(&self) -> bool {
        !self.only_in_destination.is_empty()
            || !self.source_fields_without_default.is_empty()
            || !self.type_changes.is_empty()
            || !self.mismatches.is_empty()
    }

    fn avro(source: &Value, destination: &Value) -> Self {
        let mut diff = Self::default();
        if !source.is_object() || !destination.is_object() {
            if source != destination {
                diff.mismatches.push(Mismatch {
                    attribute: "type".to_string(),
                    source: Some(render_type(source)),
                    destination: Some(render_type(destination)),
                });
            }
            return diff;
        }

        diff.compare_attributes(source, destination, &["type", "name", "namespace"]);

        let src_fields = avro_fields(source);
        let dst_fields = avro_fields(destination);
        for (name, field) in &src_fields {
            match dst_fields.get(name) {
                None => {
                    diff.only_in_source.push(name.clone());
                    if field.get("default").is_none() {
                        diff.source_fields_without_default.push(name.clone());
                    }
                }
                Some(other) => diff.compare_field_type(name, field, other),
            }
        }
        diff.only_in_destination = dst_fields
            .keys()
            .filter(|name| !src_fields.contains_key(*name))
            .cloned()
            .collect();
        diff
    }

    fn json_schema(source: &Value, destination: &Value) -> Self {
        let mut diff = Self::default();
        diff.compare_attributes(source, destination, &["type", "title", "$id"]);

        let empty = serde_json::Map::new();
        let src_props = source.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let dst_props = destination.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let required = required_set(source);

        for (name, prop) in src_props {
            match dst_props.get(name) {
                None => {
                    diff.only_in_source.push(name.clone());
                    if required.iter().any(|r| r == name) {
                        diff.source_fields_without_default.push(name.clone());
                    }
                }
                Some(other) => diff.compare_field_type(name, prop, other),
            }
        }
        diff.only_in_destination = dst_props
            .keys()
            .filter(|name| !src_props.contains_key(*name))
            .cloned()
            .collect();
        diff
    }

    fn text(source: &str, destination: &str) -> Self {
        let text_diff = TextDiff::from_lines(destination, source);
        let line_changes = text_diff
            .iter_all_changes()
            .filter_map(|change| {
                let in_source = match change.tag() {
                    ChangeTag::Insert => true,
                    ChangeTag::Delete => false,
                    ChangeTag::Equal => return None,
                };
                Some(LineChange {
                    in_source,
                    line: change.value().trim_end().to_string(),
                })
            })
            .collect();
        Self {
            line_changes,
            ..Self::default()
        }
    }

    fn compare_attributes(&mut self, source: &Value, destination: &Value, attributes: &[&str]) {
        for attribute in attributes {
            let src = source.get(*attribute).map(render_type);
            let dst = destination.get(*attribute).map(render_type);
            if src != dst {
                self.mismatches.push(Mismatch {
                    attribute: attribute.to_string(),
                    source: src,
                    destination: dst,
                });
            }
        }
    }

    fn compare_field_type(&mut self, name: &str, source: &Value, destination: &Value) {
        let src = source.get("type");
        let dst = destination.get("type");
        if src != dst {
            self.type_changes.push(TypeChange {
                field: name.to_string(),
                source_type: src.map(render_type).unwrap_or_else(|| "(none)".to_string()),
                destination_type: dst.map(render_type).unwrap_or_else(|| "(none)".to_string()),
            });
        }
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "no structural differences");
        }
        for mismatch in &self.mismatches {
            writeln!(
                f,
                "{} differs: source {} vs destination {}",
                mismatch.attribute,
                mismatch.source.as_deref().unwrap_or("(none)"),
                mismatch.destination.as_deref().unwrap_or("(none)"),
            )?;
        }
        if !self.only_in_source.is_empty() {
            writeln!(f, "fields only in source: {}", self.only_in_source.join(", "))?;
        }
        if !self.only_in_destination.is_empty() {
            writeln!(f, "fields only in destination: {}", self.only_in_destination.join(", "))?;
        }
        for change in &self.type_changes {
            writeln!(
                f,
                "field '{}' type: source {} vs destination {}",
                change.field, change.source_type, change.destination_type
            )?;
        }
        for change in &self.line_changes {
            let sign = if change.in_source { '+' } else { '-' };
            writeln!(f, "{} {}", sign, change.line)?;
        }
        Ok(())
    }
}

fn avro_fields(schema: &Value) -> BTreeMap<String, &Value> {
    schema
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.get("name").and_then(Value::as_str).map(|n| (n.to_string(), f)))
                .collect()
        })
        .unwrap_or_default()
}

fn required_set(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn render_type(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avro_field_symmetric_difference() {
        let source = r#"{"type":"record","name":"Order","namespace":"shop","fields":[
            {"name":"id","type":"long"},{"name":"total","type":"double"}]}"#;
        let destination = r#"{"type":"record","name":"Order","namespace":"shop","fields":[
            {"name":"id","type":"long"},{"name":"note","type":"string"}]}"#;

        let diff = SchemaDiff::between(source, destination, SchemaType::Avro);
        assert_eq!(diff.only_in_source, vec!["total"]);
        assert_eq!(diff.only_in_destination, vec!["note"]);
        assert_eq!(diff.source_fields_without_default, vec!["total"]);
        assert!(diff.mismatches.is_empty());
        assert!(diff.breaks_compatibility());
    }

    #[test]
    fn test_avro_added_field_with_default_is_compatible() {
        let old = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"}]}"#;
        let new = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"},
            {"name":"b","type":["null","string"],"default":null}]}"#;

        let diff = SchemaDiff::between(new, old, SchemaType::Avro);
        assert_eq!(diff.only_in_source, vec!["b"]);
        assert!(diff.source_fields_without_default.is_empty());
        assert!(!diff.breaks_compatibility());
    }

    #[test]
    fn test_avro_namespace_and_type_mismatch() {
        let source = r#"{"type":"record","name":"Order","namespace":"shop.v2","fields":[{"name":"a","type":"long"}]}"#;
        let destination = r#"{"type":"record","name":"Order","namespace":"shop","fields":[{"name":"a","type":"int"}]}"#;

        let diff = SchemaDiff::between(source, destination, SchemaType::Avro);
        assert_eq!(diff.mismatches.len(), 1);
        assert_eq!(diff.mismatches[0].attribute, "namespace");
        assert_eq!(diff.type_changes.len(), 1);
        assert_eq!(diff.type_changes[0].source_type, "long");
        assert_eq!(diff.type_changes[0].destination_type, "int");
    }

    #[test]
    fn test_avro_primitive_schemas() {
        let diff = SchemaDiff::between("\"string\"", "\"int\"", SchemaType::Avro);
        assert_eq!(diff.mismatches[0].attribute, "type");
        assert!(SchemaDiff::between("\"string\"", "\"string\"", SchemaType::Avro).is_empty());
    }

    #[test]
    fn test_json_schema_required_property() {
        let source = r#"{"type":"object","properties":{"id":{"type":"string"},"age":{"type":"integer"}},"required":["age"]}"#;
        let destination = r#"{"type":"object","properties":{"id":{"type":"string"}}}"#;

        let diff = SchemaDiff::between(source, destination, SchemaType::Json);
        assert_eq!(diff.only_in_source, vec!["age"]);
        assert_eq!(diff.source_fields_without_default, vec!["age"]);
    }

    #[test]
    fn test_protobuf_falls_back_to_lines() {
        let source = "syntax = \"proto3\";\nmessage A {\n  int32 x = 1;\n}\n";
        let destination = "syntax = \"proto3\";\nmessage A {\n  string x = 1;\n}\n";

        let diff = SchemaDiff::between(source, destination, SchemaType::Protobuf);
        assert_eq!(diff.line_changes.len(), 2);
        assert!(diff.line_changes.iter().any(|c| c.in_source && c.line.contains("int32")));
        assert!(diff.line_changes.iter().any(|c| !c.in_source && c.line.contains("string")));
        assert!(!diff.breaks_compatibility());
        assert!(diff.to_string().contains("+   int32 x = 1;"));
    }
}
