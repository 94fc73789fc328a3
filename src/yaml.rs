use crate::config::CompileOptions;
use crate::eval::DataValue;
use crate::schema::SchemaRegistry;
pub use serde_yaml::Value as YamlValue;

impl DataValue for YamlValue {
    fn null() -> Self {
        YamlValue::Null
    }

    fn from_bool(value: bool) -> Self {
        YamlValue::Bool(value)
    }

    fn from_index(value: usize) -> Self {
        YamlValue::Number((value as u64).into())
    }

    fn from_text(text: &str) -> Self {
        YamlValue::String(text.to_owned())
    }

    fn child(&self, key: &str) -> Option<Self> {
        self.get(key).cloned()
    }

    fn elements(&self) -> Option<Vec<Self>> {
        self.as_sequence().cloned()
    }

    fn is_null(&self) -> bool {
        YamlValue::is_null(self)
    }

    fn as_bool(&self) -> Option<bool> {
        YamlValue::as_bool(self)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn is_empty(&self) -> bool {
        match self {
            YamlValue::Sequence(seq) => seq.is_empty(),
            YamlValue::Mapping(map) => map.is_empty(),
            YamlValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    fn render(&self) -> String {
        match self {
            YamlValue::String(s) => s.clone(),
            YamlValue::Number(n) => n.to_string(),
            YamlValue::Bool(b) => b.to_string(),
            YamlValue::Tagged(tagged) => tagged.value.render(),
            _ => String::new(),
        }
    }
}

impl SchemaRegistry {
    pub fn from_yaml(text: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(text)
    }
}

impl CompileOptions {
    pub fn from_yaml(text: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeSchema;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_from_yaml() {
        let options = CompileOptions::from_yaml(
            r#"
            path_prefix: templates/
            formatter_types: [Money]
            path_remap:
              header: v2/header
            "#,
        )
        .unwrap();
        assert_eq!(options.path_prefix, "templates/");
        assert_eq!(options.remap("header"), "v2/header");
        assert_eq!(options.formatter_types, vec!["Money"]);
    }

    #[test]
    fn enum_schema_from_yaml() {
        let schema = SchemaRegistry::from_yaml("Color:\n  constants: [RED, GREEN]\n").unwrap();
        assert!(schema.declaration("Color").is_some());
        assert_eq!(schema.type_names().collect::<Vec<_>>(), vec!["Color"]);
    }

    #[test]
    fn yaml_documents_render() {
        let value: YamlValue = serde_yaml::from_str("team: [a, b]\nempty: {}\n").unwrap();
        let team = value.child("team").unwrap().elements().unwrap();
        assert_eq!(team.iter().map(|v| v.render()).collect::<String>(), "ab");
        assert!(value.child("empty").unwrap().is_empty());
        assert_eq!(YamlValue::from_index(3).render(), "3");
    }
}
