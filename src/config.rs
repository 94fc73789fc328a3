use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Compiler settings, usually deserialized from the build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Prepended to template names when resolving resources.
    pub path_prefix: String,
    /// Appended to template names when resolving resources.
    pub path_suffix: String,
    pub charset: String,
    /// Broken dotted chains in inverted sections are errors instead of falsey.
    pub strict_broken_chain: bool,
    /// Record the context stack walk on lookup failures.
    pub debug: bool,
    /// Declared types that may be rendered by `{{name}}`.
    pub formatter_types: Vec<String>,
    /// Template name rewrites, applied before prefix and suffix.
    pub path_remap: BTreeMap<String, String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            path_prefix: String::new(),
            path_suffix: String::new(),
            charset: "UTF-8".to_owned(),
            strict_broken_chain: false,
            debug: false,
            formatter_types: Vec::new(),
            path_remap: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    pub fn remap<'a>(&'a self, name: &'a str) -> &'a str {
        self.path_remap.get(name).map_or(name, String::as_str)
    }

    /// Resource path for a template name.
    pub fn resource_path(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}{}", self.path_prefix, self.remap(name), self.path_suffix))
    }

    pub fn is_utf8(&self) -> bool {
        let charset = self.charset.to_ascii_lowercase();
        charset == "utf-8" || charset == "utf8"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    Inline(String),
    /// Resolved through the options' prefix and suffix.
    Resource(String),
}

/// One template to compile against one model type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub name: String,
    /// Name of the root model type in the schema.
    pub model: String,
    pub source: TemplateSource,
    #[serde(default)]
    pub options: CompileOptions,
}

impl CompileRequest {
    pub fn inline(name: &str, model: &str, text: &str) -> Self {
        CompileRequest {
            name: name.to_owned(),
            model: model.to_owned(),
            source: TemplateSource::Inline(text.to_owned()),
            options: CompileOptions::default(),
        }
    }

    pub fn resource(name: &str, model: &str) -> Self {
        CompileRequest {
            name: name.to_owned(),
            model: model.to_owned(),
            source: TemplateSource::Resource(name.to_owned()),
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict(mut self) -> Self {
        self.options.strict_broken_chain = true;
        self
    }
}
