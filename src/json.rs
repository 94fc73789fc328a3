use crate::config::CompileOptions;
use crate::eval::DataValue;
use crate::schema::SchemaRegistry;
pub use serde_json::Value as JsonValue;

impl DataValue for JsonValue {
    fn null() -> Self {
        JsonValue::Null
    }

    fn from_bool(value: bool) -> Self {
        JsonValue::Bool(value)
    }

    fn from_index(value: usize) -> Self {
        JsonValue::from(value)
    }

    fn from_text(text: &str) -> Self {
        JsonValue::String(text.to_owned())
    }

    fn child(&self, key: &str) -> Option<Self> {
        self.get(key).cloned()
    }

    fn elements(&self) -> Option<Vec<Self>> {
        self.as_array().cloned()
    }

    fn is_null(&self) -> bool {
        JsonValue::is_null(self)
    }

    fn as_bool(&self) -> Option<bool> {
        JsonValue::as_bool(self)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn is_empty(&self) -> bool {
        match self {
            JsonValue::Array(seq) => seq.is_empty(),
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn render(&self) -> String {
        match self {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl SchemaRegistry {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl CompileOptions {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TypeRef, TypeSchema};
    use pretty_assertions::assert_eq;

    #[test]
    fn schema_from_json() {
        let schema = SchemaRegistry::from_json(
            r#"{ "Person": { "members": [ { "name": "tags", "type": "list<str>" } ] } }"#,
        )
        .unwrap();
        let members = schema.members(&TypeRef::named("Person"));
        assert_eq!(members[0].ty, TypeRef::list(TypeRef::Str));
    }

    #[test]
    fn options_from_json() {
        let options = CompileOptions::from_json(r#"{ "path_suffix": ".mustache", "strict_broken_chain": true }"#)
            .unwrap();
        assert!(options.strict_broken_chain);
        assert_eq!(options.charset, "UTF-8");
    }

    #[test]
    fn rendered_text() {
        let value = serde_json::json!({ "s": "x", "n": 3, "b": false, "z": null });
        let rendered = ["s", "n", "b", "z"]
            .iter()
            .map(|key| value.child(key).unwrap().render())
            .collect::<Vec<_>>();
        assert_eq!(rendered, vec!["x", "3", "false", ""]);
    }
}
