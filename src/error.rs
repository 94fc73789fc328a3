use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Where in a template source a diagnostic applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: String,
    /// 1-based.
    pub row: usize,
    /// 1-based, counted in characters.
    pub column: usize,
    /// The full source line, without its line terminator.
    pub line: String,
}

impl SourcePosition {
    pub fn new(file: &str, row: usize, column: usize, line: &str) -> Self {
        SourcePosition {
            file: file.to_owned(),
            row,
            column,
            line: line.to_owned(),
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]", self.file, self.row, self.column)
    }
}

/// Why a member that exists under the requested name cannot be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessViolation {
    PrivateMethod,
    StaticMethod,
    CheckedException,
    PrivateField,
    StaticField,
}

impl fmt::Display for AccessViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AccessViolation::PrivateMethod => "method is private",
            AccessViolation::StaticMethod => "method is static",
            AccessViolation::CheckedException => "method throws a checked exception",
            AccessViolation::PrivateField => "field is private",
            AccessViolation::StaticField => "field is static",
        };
        f.write_str(text)
    }
}

/// Compile-time diagnostics. The first one raised aborts the template.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{position}: {message} (templates: {templates})")]
    Lex {
        position: SourcePosition,
        message: String,
        templates: String,
    },

    #[error("{position}: {message} (templates: {templates})")]
    UnmatchedSection {
        position: SourcePosition,
        message: String,
        templates: String,
    },

    #[error("{position}: {} (templates: {templates})", missing_field(.name, .access))]
    FieldNotFound {
        position: SourcePosition,
        name: String,
        access: Option<AccessViolation>,
        templates: String,
        /// Context stack walk, only recorded in debug mode.
        trace: Option<String>,
    },

    #[error("{position}: {message} (templates: {templates})")]
    Type {
        position: SourcePosition,
        message: String,
        templates: String,
    },

    #[error("{position}: invalid signature for lambda '{lambda}': {message} (templates: {templates})")]
    LambdaSignature {
        position: SourcePosition,
        lambda: String,
        message: String,
        templates: String,
    },

    #[error("{position}: block '{name}' is defined more than once in the same parent call (templates: {templates})")]
    DuplicateBlock {
        position: SourcePosition,
        name: String,
        templates: String,
    },

    #[error("{position}: template not found: '{name}' (templates: {templates})")]
    TemplateNotFound {
        position: SourcePosition,
        name: String,
        templates: String,
    },

    #[error("{position}: recursive template reference: {chain} (templates: {templates})")]
    RecursiveTemplate {
        position: SourcePosition,
        chain: String,
        templates: String,
    },

    #[error("unable to read template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn missing_field(name: &str, access: &Option<AccessViolation>) -> String {
    match access {
        Some(violation) => format!("field '{}' is not accessible: {}", name, violation),
        None => format!("field not found in current context: '{}'", name),
    }
}

impl CompileError {
    /// Position of the offending token, if the error has one.
    pub fn position(&self) -> Option<&SourcePosition> {
        match self {
            CompileError::Lex { position, .. }
            | CompileError::UnmatchedSection { position, .. }
            | CompileError::FieldNotFound { position, .. }
            | CompileError::Type { position, .. }
            | CompileError::LambdaSignature { position, .. }
            | CompileError::DuplicateBlock { position, .. }
            | CompileError::TemplateNotFound { position, .. }
            | CompileError::RecursiveTemplate { position, .. } => Some(position),
            CompileError::Io { .. } => None,
        }
    }

    pub(crate) fn lex(position: SourcePosition, message: impl Into<String>, templates: impl Into<String>) -> Self {
        CompileError::Lex {
            position,
            message: message.into(),
            templates: templates.into(),
        }
    }

    pub(crate) fn unmatched(
        position: SourcePosition,
        message: impl Into<String>,
        templates: impl Into<String>,
    ) -> Self {
        CompileError::UnmatchedSection {
            position,
            message: message.into(),
            templates: templates.into(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Outcome of a failed binding, before a source position is known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("field not found in current context: '{name}'")]
    NotFound { name: String, trace: Option<String> },

    #[error("field '{name}' is not accessible: {access}")]
    Inaccessible {
        name: String,
        access: AccessViolation,
    },

    #[error("{0}")]
    Type(String),

    #[error("invalid signature for lambda '{lambda}': {message}")]
    LambdaSignature { lambda: String, message: String },
}

impl BindError {
    pub(crate) fn at(self, position: SourcePosition, templates: &str) -> CompileError {
        match self {
            BindError::NotFound { name, trace } => CompileError::FieldNotFound {
                position,
                name,
                access: None,
                templates: templates.to_owned(),
                trace,
            },
            BindError::Inaccessible { name, access } => CompileError::FieldNotFound {
                position,
                name,
                access: Some(access),
                templates: templates.to_owned(),
                trace: None,
            },
            BindError::Type(message) => CompileError::Type {
                position,
                message,
                templates: templates.to_owned(),
            },
            BindError::LambdaSignature { lambda, message } => CompileError::LambdaSignature {
                position,
                lambda,
                message,
                templates: templates.to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn field_not_found_message() {
        let position = SourcePosition::new("page.mustache", 3, 7, "  {{title}}");
        let error = BindError::NotFound {
            name: "title".to_owned(),
            trace: None,
        }
        .at(position, "page.mustache");
        assert_eq!(
            error.to_string(),
            "page.mustache[3:7]: field not found in current context: 'title' (templates: page.mustache)"
        );
        assert_eq!(error.position().map(|p| p.row), Some(3));
    }

    #[test]
    fn access_violation_message() {
        let position = SourcePosition::new("t", 1, 1, "{{secret}}");
        let error = BindError::Inaccessible {
            name: "secret".to_owned(),
            access: AccessViolation::PrivateField,
        }
        .at(position, "t");
        assert!(matches!(
            error,
            CompileError::FieldNotFound {
                access: Some(AccessViolation::PrivateField),
                ..
            }
        ));
        assert_eq!(
            error.to_string(),
            "t[1:1]: field 'secret' is not accessible: field is private (templates: t)"
        );
    }
}
