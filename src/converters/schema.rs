use indexmap::IndexMap;
use serde_json::Value;

use crate::error::GatewayError;
use crate::models::gemini::{Schema, SchemaType};
use crate::ordered::JsonMap;

/// Bound on `$ref` chains and nesting; cycles are not detected by contract
const MAX_DEPTH: usize = 16;

/// Translate a JSON Schema (ordered) into a Gemini schema.
///
/// Recognized keys are dispatched case-insensitively; everything else is
/// silently discarded. `$defs` is extracted once at the root; only
/// single-hop `#/$defs/<name>` references are supported.
pub fn translate(schema: &JsonMap) -> Result<Schema, GatewayError> {
    let defs = extract_defs(schema)?;
    walk(schema, &defs, 0)
}

/// Convenience entry point for schema values carried as `serde_json::Value`
/// (function parameters, response-format schemas)
pub fn translate_value(value: &Value) -> Result<Schema, GatewayError> {
    let map = JsonMap::from_value(value.clone())?;
    translate(&map)
}

fn extract_defs(root: &JsonMap) -> Result<IndexMap<String, JsonMap>, GatewayError> {
    let mut defs = IndexMap::new();
    for (key, value) in root.entries() {
        if key.eq_ignore_ascii_case("$defs") {
            let block = JsonMap::from_value(value.clone())?;
            for (name, def) in block.into_iter() {
                defs.insert(name, JsonMap::from_value(def)?);
            }
            break;
        }
    }
    Ok(defs)
}

fn walk(
    node: &JsonMap,
    defs: &IndexMap<String, JsonMap>,
    depth: usize,
) -> Result<Schema, GatewayError> {
    if depth > MAX_DEPTH {
        return Err(GatewayError::Conversion(
            "schema nesting exceeds maximum depth".to_string(),
        ));
    }

    // A reference replaces the node it appears on
    if let Some(reference) = find_key(node, "$ref") {
        let resolved = resolve_ref(reference, defs)?;
        return walk(resolved, defs, depth + 1);
    }

    let mut schema = Schema::default();

    for (key, value) in node.entries() {
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                schema.schema_type = Some(translate_type(value)?);
            }
            "format" => {
                if let Some(format) = value.as_str() {
                    schema.format = Some(format.to_string());
                }
            }
            "description" => {
                if let Some(description) = value.as_str() {
                    schema.description = Some(description.to_string());
                }
            }
            "nullable" => {
                if let Some(nullable) = value.as_bool() {
                    schema.nullable = Some(nullable);
                }
            }
            "enum" => {
                if let Some(values) = value.as_array() {
                    schema.enum_values = Some(values.iter().map(scalar_to_string).collect());
                }
            }
            "items" => {
                let items = JsonMap::from_value(value.clone())?;
                schema.items = Some(Box::new(walk(&items, defs, depth + 1)?));
            }
            "properties" => {
                let block = JsonMap::from_value(value.clone())?;
                let mut properties = IndexMap::new();
                for (name, property) in block.into_iter() {
                    let property = JsonMap::from_value(property)?;
                    properties.insert(name, walk(&property, defs, depth + 1)?);
                }
                schema.properties = Some(properties);
            }
            "required" => {
                if let Some(values) = value.as_array() {
                    schema.required = Some(values.iter().map(scalar_to_string).collect());
                }
            }
            // Unknown keys are discarded without affecting recognized ones
            _ => {}
        }
    }

    Ok(schema)
}

fn find_key<'a>(node: &'a JsonMap, wanted: &str) -> Option<&'a Value> {
    node.entries()
        .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value)
}

fn resolve_ref<'a>(
    reference: &Value,
    defs: &'a IndexMap<String, JsonMap>,
) -> Result<&'a JsonMap, GatewayError> {
    let reference = reference.as_str().ok_or_else(|| {
        GatewayError::Conversion("failed to resolve $ref: reference must be a string".to_string())
    })?;

    reference
        .strip_prefix("#/$defs/")
        .and_then(|name| defs.get(name))
        .ok_or_else(|| {
            GatewayError::Conversion(format!("failed to resolve $ref '{}'", reference))
        })
}

fn translate_type(value: &Value) -> Result<SchemaType, GatewayError> {
    let name = value.as_str().ok_or_else(|| {
        GatewayError::Conversion(format!("schema type must be a string, got {}", value))
    })?;

    match name.to_ascii_lowercase().as_str() {
        "string" => Ok(SchemaType::String),
        "number" => Ok(SchemaType::Number),
        "integer" => Ok(SchemaType::Integer),
        "boolean" => Ok(SchemaType::Boolean),
        "array" => Ok(SchemaType::Array),
        "object" => Ok(SchemaType::Object),
        other => Err(GatewayError::Conversion(format!(
            "unsupported schema type '{}'",
            other
        ))),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        JsonMap::from_value(value).unwrap()
    }

    #[test]
    fn test_translate_object_with_ordered_properties() {
        let schema = map(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name"]
        }));

        let gemini = translate(&schema).unwrap();
        assert_eq!(gemini.schema_type, Some(SchemaType::Object));
        let properties = gemini.properties.unwrap();
        assert_eq!(
            properties.keys().collect::<Vec<_>>(),
            vec!["name", "age"]
        );
        assert_eq!(
            properties["name"].schema_type,
            Some(SchemaType::String)
        );
        assert_eq!(gemini.required, Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_translate_resolves_defs_inline() {
        let schema = map(json!({
            "type": "object",
            "properties": {
                "address": {"$ref": "#/$defs/address"}
            },
            "$defs": {
                "address": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                }
            }
        }));

        let gemini = translate(&schema).unwrap();
        let properties = gemini.properties.unwrap();
        let address = &properties["address"];
        assert_eq!(address.schema_type, Some(SchemaType::Object));
        assert!(address.properties.as_ref().unwrap().contains_key("city"));
    }

    #[test]
    fn test_translate_unresolved_ref_fails() {
        let schema = map(json!({
            "type": "object",
            "properties": {
                "address": {"$ref": "#/$defs/missing"}
            }
        }));

        let err = translate(&schema).unwrap_err();
        assert!(err.to_string().contains("failed to resolve $ref"));
    }

    #[test]
    fn test_translate_discards_unknown_keys() {
        let schema = map(json!({
            "type": "string",
            "minLength": 3,
            "pattern": "^a",
            "x-internal": true,
            "format": "date-time"
        }));

        let gemini = translate(&schema).unwrap();
        assert_eq!(gemini.schema_type, Some(SchemaType::String));
        assert_eq!(gemini.format.as_deref(), Some("date-time"));
    }

    #[test]
    fn test_translate_case_insensitive_keys() {
        let schema = map(json!({
            "Type": "object",
            "Properties": {"x": {"TYPE": "number"}}
        }));

        let gemini = translate(&schema).unwrap();
        assert_eq!(gemini.schema_type, Some(SchemaType::Object));
        assert_eq!(
            gemini.properties.unwrap()["x"].schema_type,
            Some(SchemaType::Number)
        );
    }

    #[test]
    fn test_translate_unknown_type_is_error() {
        let schema = map(json!({"type": "tuple"}));
        let err = translate(&schema).unwrap_err();
        assert!(err.to_string().contains("unsupported schema type"));
    }

    #[test]
    fn test_translate_enum_and_items() {
        let schema = map(json!({
            "type": "array",
            "items": {"type": "string", "enum": ["a", "b", 3]}
        }));

        let gemini = translate(&schema).unwrap();
        let items = gemini.items.unwrap();
        assert_eq!(items.schema_type, Some(SchemaType::String));
        assert_eq!(
            items.enum_values,
            Some(vec!["a".to_string(), "b".to_string(), "3".to_string()])
        );
    }

    #[test]
    fn test_translate_nullable_and_description() {
        let schema = map(json!({
            "type": "string",
            "description": "a name",
            "nullable": true
        }));

        let gemini = translate(&schema).unwrap();
        assert_eq!(gemini.description.as_deref(), Some("a name"));
        assert_eq!(gemini.nullable, Some(true));
    }

    #[test]
    fn test_translate_ref_chain_is_depth_capped() {
        // a -> b -> a would otherwise loop forever
        let schema = map(json!({
            "$ref": "#/$defs/a",
            "$defs": {
                "a": {"$ref": "#/$defs/b"},
                "b": {"$ref": "#/$defs/a"}
            }
        }));

        let err = translate(&schema).unwrap_err();
        assert!(err.to_string().contains("maximum depth"));
    }

    #[test]
    fn test_nested_defs_are_not_honored() {
        let schema = map(json!({
            "type": "object",
            "properties": {
                "inner": {
                    "$defs": {"x": {"type": "string"}},
                    "$ref": "#/$defs/x"
                }
            }
        }));

        // The nested $defs block is not consulted; only the root one is
        assert!(translate(&schema).is_err());
    }
}
