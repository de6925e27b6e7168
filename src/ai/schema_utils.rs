use serde::Serialize;
use serde_json::{Map, Value, json};

/// Turns a schemars root schema into a compact, self-contained hint for a
/// prompt: `$ref`s are inlined and metadata the model does not need is dropped.
pub fn compact_schema<T: Serialize>(root: T) -> serde_json::Result<Value> {
    let mut root_val = serde_json::to_value(root)?;

    let definitions = root_val
        .get("definitions")
        .or_else(|| root_val.get("$defs"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    compact_node(&mut root_val, &definitions, 0);

    if let Value::Object(ref mut map) = root_val {
        map.remove("definitions");
        map.remove("$defs");
    }

    Ok(root_val)
}

fn compact_node(node: &mut Value, definitions: &Map<String, Value>, depth: usize) {
    if depth > 16 {
        *node = json!({ "type": "object" });
        return;
    }

    let mut resolved = 0;
    while let Some(target) = node.get("$ref").and_then(Value::as_str).map(str::to_string) {
        resolved += 1;
        let name = target.rsplit('/').next().unwrap_or_default();
        match definitions.get(name) {
            Some(def) if resolved <= 8 => *node = def.clone(),
            _ => {
                *node = json!({ "type": "object" });
                break;
            }
        }
    }

    match node {
        Value::Object(map) => {
            for key in ["$schema", "$id", "title", "default", "examples", "additionalProperties"] {
                map.remove(key);
            }

            // ["string", "null"] -> "string"
            if let Some(Value::Array(types)) = map.get("type") {
                if let Some(first) = types.iter().find(|t| t.as_str() != Some("null")).cloned() {
                    map.insert("type".to_string(), first);
                }
            }

            if let Some(Value::Object(props)) = map.get_mut("properties") {
                for val in props.values_mut() {
                    compact_node(val, definitions, depth + 1);
                }
            }
            if let Some(items) = map.get_mut("items") {
                compact_node(items, definitions, depth + 1);
            }
            for key in ["allOf", "anyOf", "oneOf"] {
                if let Some(Value::Array(arr)) = map.get_mut(key) {
                    for item in arr.iter_mut() {
                        compact_node(item, definitions, depth + 1);
                    }
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                compact_node(item, definitions, depth + 1);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TestCaseDraft;
    use schemars::schema_for;

    #[test]
    fn test_case_array_schema_is_inlined() {
        let schema = compact_schema(schema_for!(Vec<TestCaseDraft>)).unwrap();
        assert_eq!(schema["type"], "array");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("definitions").is_none());

        let props = &schema["items"]["properties"];
        assert_eq!(props["difficulty"]["type"], "integer");
        assert!(props["testingAspect"].is_object());
        assert!(props["expectedBehavior"]["description"].is_string());
        assert!(!schema.to_string().contains("$ref"));
    }

    #[test]
    fn nullable_type_arrays_collapse_and_unknown_refs_degrade() {
        let mut node = json!({
            "type": "object",
            "properties": {
                "note": { "type": ["string", "null"], "default": null },
                "ghost": { "$ref": "#/definitions/Missing" }
            }
        });
        compact_node(&mut node, &Map::new(), 0);
        assert_eq!(node["properties"]["note"], json!({ "type": "string" }));
        assert_eq!(node["properties"]["ghost"], json!({ "type": "object" }));
    }
}
