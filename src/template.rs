use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::CompileOptions;
use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateBody {
    Inline(String),
    File(PathBuf),
}

/// The definition behind a partial or parent reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTemplate {
    pub name: String,
    pub body: TemplateBody,
}

impl NamedTemplate {
    pub fn inline(name: &str, text: &str) -> Self {
        NamedTemplate {
            name: name.to_owned(),
            body: TemplateBody::Inline(text.to_owned()),
        }
    }

    pub fn file(name: &str, path: PathBuf) -> Self {
        NamedTemplate {
            name: name.to_owned(),
            body: TemplateBody::File(path),
        }
    }

    pub fn read(&self, options: &CompileOptions) -> CompileResult<String> {
        match &self.body {
            TemplateBody::Inline(text) => Ok(text.clone()),
            TemplateBody::File(path) => read_resource(path, options),
        }
    }
}

pub(crate) fn read_resource(path: &Path, options: &CompileOptions) -> CompileResult<String> {
    let io_error = |source: io::Error| CompileError::Io {
        path: path.to_owned(),
        source,
    };
    if !options.is_utf8() {
        return Err(io_error(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported charset: {}", options.charset),
        )));
    }
    let bytes = fs::read(path).map_err(io_error)?;
    String::from_utf8(bytes).map_err(|err| io_error(io::Error::new(io::ErrorKind::InvalidData, err)))
}

/// Resolves template names for partial and parent tags.
pub trait TemplateStore {
    fn get(&self, name: &str, options: &CompileOptions) -> Option<NamedTemplate>;
}

/// Templates registered by name, falling back to files under a root directory.
#[derive(Debug, Clone, Default)]
pub struct TemplateMap {
    templates: BTreeMap<String, String>,
    root: Option<PathBuf>,
}

impl TemplateMap {
    pub fn new() -> Self {
        TemplateMap::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        TemplateMap {
            templates: BTreeMap::new(),
            root: Some(root.into()),
        }
    }

    pub fn insert(&mut self, name: &str, text: &str) -> &mut Self {
        self.templates.insert(name.to_owned(), text.to_owned());
        self
    }
}

impl<N: AsRef<str>, T: AsRef<str>> FromIterator<(N, T)> for TemplateMap {
    fn from_iter<I: IntoIterator<Item = (N, T)>>(iter: I) -> Self {
        let mut map = TemplateMap::new();
        for (name, text) in iter {
            map.insert(name.as_ref(), text.as_ref());
        }
        map
    }
}

impl TemplateStore for TemplateMap {
    fn get(&self, name: &str, options: &CompileOptions) -> Option<NamedTemplate> {
        let text = self
            .templates
            .get(options.remap(name))
            .or_else(|| self.templates.get(name));
        if let Some(text) = text {
            return Some(NamedTemplate::inline(name, text));
        }
        let path = self.root.as_ref()?.join(options.resource_path(name));
        path.is_file().then(|| NamedTemplate::file(name, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Root,
    Partial,
    Parent,
    Lambda,
}

/// The chain of templates being expanded, innermost first. Diagnostics only.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TemplateStack<'a> {
    pub name: &'a str,
    pub kind: TemplateKind,
    pub caller: Option<&'a TemplateStack<'a>>,
}

impl<'a> TemplateStack<'a> {
    pub(crate) fn root(name: &'a str) -> Self {
        TemplateStack {
            name,
            kind: TemplateKind::Root,
            caller: None,
        }
    }

    pub(crate) fn push<'b>(&'b self, name: &'b str, kind: TemplateKind) -> TemplateStack<'b> {
        TemplateStack {
            name,
            kind,
            caller: Some(self),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &TemplateStack<'a>> {
        std::iter::successors(Some(self), |t| t.caller)
    }

    /// The reference chain ending in `name` when `name` is already being
    /// expanded, e.g. `page -> header -> page`.
    pub(crate) fn cycle_to(&self, name: &str) -> Option<String> {
        let mut names = self
            .iter()
            .filter(|t| t.kind != TemplateKind::Lambda)
            .map(|t| t.name)
            .collect::<Vec<_>>();
        if !names.contains(&name) {
            return None;
        }
        names.reverse();
        let start = names.iter().position(|n| *n == name).unwrap_or(0);
        let mut chain = names[start..].to_vec();
        chain.push(name);
        Some(chain.join(" -> "))
    }
}

impl fmt::Display for TemplateStack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter().map(|t| t.name).collect::<Vec<_>>();
        f.write_str(&names.join(" <- "))
    }
}
