/// Integration tests for response formats and JSON schema translation
use ogem::{
    converters::{openai_to_anthropic, openai_to_gemini, schema},
    models::{
        gemini::SchemaType,
        openai::{ChatCompletionRequest, ChatMessage, JsonSchemaSpec, ResponseFormat},
    },
    ordered::JsonMap,
};
use serde_json::json;

fn request_with_format(format: ResponseFormat) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: "gemini-2.0-flash".to_string(),
        messages: vec![ChatMessage::user("List three colors")],
        response_format: Some(format),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_plain_text_format_maps_to_text_mime() {
    let request = request_with_format(ResponseFormat::Text);
    let (gemini_req, _) = openai_to_gemini::convert_request(&request, None)
        .await
        .unwrap();

    assert_eq!(
        gemini_req
            .generation_config
            .unwrap()
            .response_mime_type
            .as_deref(),
        Some("text/plain")
    );
}

#[tokio::test]
async fn test_json_object_format_has_no_schema() {
    let request = request_with_format(ResponseFormat::JsonObject);
    let (gemini_req, _) = openai_to_gemini::convert_request(&request, None)
        .await
        .unwrap();

    let config = gemini_req.generation_config.unwrap();
    assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
    assert!(config.response_schema.is_none());
}

#[tokio::test]
async fn test_json_schema_format_embeds_translated_schema() {
    let request = request_with_format(ResponseFormat::JsonSchema {
        json_schema: JsonSchemaSpec {
            name: "person".to_string(),
            description: None,
            schema: Some(json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "age": {"type": "integer"}
                },
                "required": ["name"]
            })),
            strict: Some(true),
        },
    });

    let (gemini_req, _) = openai_to_gemini::convert_request(&request, None)
        .await
        .unwrap();

    let config = gemini_req.generation_config.unwrap();
    assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));

    let translated = config.response_schema.unwrap();
    assert_eq!(translated.schema_type, Some(SchemaType::Object));
    let properties = translated.properties.unwrap();
    assert_eq!(properties.keys().collect::<Vec<_>>(), vec!["name", "age"]);
    assert_eq!(translated.required, Some(vec!["name".to_string()]));
}

#[tokio::test]
async fn test_null_schema_is_rejected() {
    let request = request_with_format(ResponseFormat::JsonSchema {
        json_schema: JsonSchemaSpec {
            name: "person".to_string(),
            description: None,
            schema: None,
            strict: None,
        },
    });

    assert!(openai_to_gemini::convert_request(&request, None)
        .await
        .is_err());
}

#[test]
fn test_schema_defs_resolve_inline() {
    let schema = JsonMap::from_value(json!({
        "type": "object",
        "properties": {
            "home": {"$ref": "#/$defs/address"},
            "work": {"$ref": "#/$defs/address"}
        },
        "$defs": {
            "address": {
                "type": "object",
                "properties": {
                    "street": {"type": "string"},
                    "city": {"type": "string"}
                }
            }
        }
    }))
    .unwrap();

    let translated = schema::translate(&schema).unwrap();
    let properties = translated.properties.unwrap();
    for key in ["home", "work"] {
        let resolved = &properties[key];
        assert_eq!(resolved.schema_type, Some(SchemaType::Object));
        let inner = resolved.properties.as_ref().unwrap();
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec!["street", "city"]);
    }
}

#[test]
fn test_schema_unresolved_ref_message() {
    let schema = JsonMap::from_value(json!({"$ref": "#/$defs/ghost"})).unwrap();
    let err = schema::translate(&schema).unwrap_err();
    assert!(err.to_string().contains("failed to resolve $ref"));
}

#[test]
fn test_schema_unknown_keys_silently_discarded() {
    let schema = JsonMap::from_value(json!({
        "type": "object",
        "additionalProperties": false,
        "minProperties": 1,
        "properties": {"x": {"type": "number", "exclusiveMinimum": 0}}
    }))
    .unwrap();

    let translated = schema::translate(&schema).unwrap();
    assert_eq!(translated.schema_type, Some(SchemaType::Object));
    assert_eq!(
        translated.properties.unwrap()["x"].schema_type,
        Some(SchemaType::Number)
    );
}

#[test]
fn test_ordered_map_round_trip() {
    let source = r#"{"z":1,"m":{"b":2,"a":3},"a":[{"y":1,"x":2}]}"#;
    let map = JsonMap::parse(source).unwrap();
    assert_eq!(map.to_json().unwrap(), source);
}

#[tokio::test]
async fn test_anthropic_json_mode_via_system_injection() {
    let mut request = request_with_format(ResponseFormat::JsonSchema {
        json_schema: JsonSchemaSpec {
            name: "colors".to_string(),
            description: None,
            schema: Some(json!({"type": "object", "properties": {"colors": {"type": "array", "items": {"type": "string"}}}})),
            strict: None,
        },
    });
    request.model = "claude-3-5-sonnet".to_string();

    let (anthropic_req, warnings) = openai_to_anthropic::convert_request(&request).await.unwrap();
    let system = anthropic_req.system.unwrap();
    assert!(system.contains("JSON"));
    assert!(system.contains("colors"));
    assert!(!warnings.is_empty());
}
