use crate::error::SourcePosition;

/// Open/close tag markers, `{{` and `}}` unless changed with `{{=<% %>=}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters<'a> {
    pub open: &'a str,
    pub close: &'a str,
}

impl Default for Delimiters<'_> {
    fn default() -> Self {
        Delimiters {
            open: "{{",
            close: "}}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    BeginSection,
    BeginInvertedSection,
    BeginBlockSection,
    BeginParentSection,
    EndSection,
    Partial,
    Variable,
    UnescapedVariable,
}

impl TagKind {
    pub(crate) fn from_sigil(sigil: char) -> Option<TagKind> {
        match sigil {
            '#' => Some(TagKind::BeginSection),
            '^' => Some(TagKind::BeginInvertedSection),
            '$' => Some(TagKind::BeginBlockSection),
            '<' => Some(TagKind::BeginParentSection),
            '/' => Some(TagKind::EndSection),
            '>' => Some(TagKind::Partial),
            '&' => Some(TagKind::UnescapedVariable),
            _ => None,
        }
    }

    pub fn is_begin(self) -> bool {
        matches!(
            self,
            TagKind::BeginSection
                | TagKind::BeginInvertedSection
                | TagKind::BeginBlockSection
                | TagKind::BeginParentSection
        )
    }

    /// Tags referring to another template rather than to data.
    pub fn is_template_reference(self) -> bool {
        matches!(self, TagKind::Partial | TagKind::BeginParentSection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Tag {
        kind: TagKind,
        name: &'a str,
        delimiters: Delimiters<'a>,
        raw: &'a str,
    },
    Comment {
        text: &'a str,
        raw: &'a str,
    },
    DelimiterChange {
        old: Delimiters<'a>,
        new: Delimiters<'a>,
        raw: &'a str,
    },
    /// A quote or backslash, kept apart so emitters can escape them.
    Special(&'a str),
    /// `\n` or `\r\n`.
    Newline(&'a str),
    /// A malformed tag, reported once the driver reaches it.
    Invalid {
        message: &'static str,
        raw: &'a str,
    },
    EndOfFile,
}

impl<'a> Token<'a> {
    /// The exact source text this token was scanned from.
    pub fn raw(&self) -> &'a str {
        match *self {
            Token::Text(text) | Token::Special(text) | Token::Newline(text) => text,
            Token::Tag { raw, .. }
            | Token::Comment { raw, .. }
            | Token::DelimiterChange { raw, .. }
            | Token::Invalid { raw, .. } => raw,
            Token::EndOfFile => "",
        }
    }

    pub fn is_whitespace(&self) -> bool {
        match self {
            Token::Text(text) => text.chars().all(char::is_whitespace),
            _ => false,
        }
    }

    pub fn is_newline(&self) -> bool {
        matches!(self, Token::Newline(_))
    }

    pub fn is_newline_or_eof(&self) -> bool {
        matches!(self, Token::Newline(_) | Token::EndOfFile)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Token::EndOfFile)
    }

    /// Tags whose line is removed from output when nothing else is on it.
    pub fn is_standalone_candidate(&self) -> bool {
        match self {
            Token::Tag { kind, .. } => !matches!(kind, TagKind::Variable | TagKind::UnescapedVariable),
            Token::Comment { .. } | Token::DelimiterChange { .. } => true,
            _ => false,
        }
    }

    /// Tags that take the indentation of their standalone line.
    pub fn is_indentable(&self) -> bool {
        matches!(self, Token::Tag { kind, .. } if kind.is_template_reference())
    }

    pub fn tag(&self) -> Option<(TagKind, &'a str)> {
        match *self {
            Token::Tag { kind, name, .. } => Some((kind, name)),
            _ => None,
        }
    }

    pub fn is_end_of(&self, section: &str) -> bool {
        matches!(self, Token::Tag { kind: TagKind::EndSection, name, .. } if *name == section)
    }
}

/// A token together with where it was scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Positioned<'a> {
    pub token: Token<'a>,
    pub file: &'a str,
    pub row: usize,
    pub column: usize,
    pub line: &'a str,
    /// The whole template the token belongs to.
    pub source: &'a str,
    /// Byte offset of the token in `source`.
    pub offset: usize,
}

impl<'a> Positioned<'a> {
    pub fn position(&self) -> SourcePosition {
        SourcePosition::new(self.file, self.row, self.column, self.line)
    }

    /// Byte offset just past the token.
    pub fn end(&self) -> usize {
        self.offset + self.token.raw().len()
    }
}
