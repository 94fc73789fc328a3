use crate::error::SourcePosition;
use crate::token::{Delimiters, Positioned, TagKind, Token};

/// Streaming lexer over one template source.
///
/// Delimiter-change tags take effect for the rest of the source. Malformed
/// tags come out as [Token::Invalid]. The last token produced is always
/// [Token::EndOfFile].
#[derive(Clone)]
pub(crate) struct Reader<'a> {
    file: &'a str,
    input: &'a str,
    delimiters: Delimiters<'a>,
    pos: usize,
    row: usize,
    line_start: usize,
    finished: bool,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(file: &'a str, input: &'a str) -> Self {
        Reader {
            file,
            input,
            delimiters: Delimiters::default(),
            pos: 0,
            row: 1,
            line_start: 0,
            finished: false,
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<Positioned<'a>> {
        if self.finished {
            return None;
        }
        let tail = &self.input[self.pos..];
        let token = if tail.is_empty() {
            self.finished = true;
            Token::EndOfFile
        } else if tail.starts_with(self.delimiters.open) {
            self.read_tag(tail)
        } else if let Some(newline) = tail.span_newline() {
            Token::Newline(newline)
        } else if let Some(special) = tail.span_special() {
            Token::Special(special)
        } else {
            Token::Text(tail.span_text(self.delimiters.open))
        };
        let positioned = self.positioned(token);
        self.advance(token.raw().len());
        Some(positioned)
    }

    /// Continues scanning at `offset` with the given delimiters.
    pub(crate) fn rewind(&mut self, offset: usize, delimiters: Delimiters<'a>) {
        let before = &self.input[..offset];
        self.pos = offset;
        self.row = before.matches('\n').count() + 1;
        self.line_start = before.rfind('\n').map_or(0, |p| p + 1);
        self.delimiters = delimiters;
        self.finished = false;
    }

    /// Whether the token was scanned from this reader's source.
    pub(crate) fn owns(&self, token: &Positioned<'_>) -> bool {
        std::ptr::eq(self.input, token.source)
    }

    fn read_tag(&mut self, tail: &'a str) -> Token<'a> {
        let open = self.delimiters.open;
        let close = self.delimiters.close;
        let after_open = &tail[open.len()..];
        if let Some(inner) = after_open.strip_prefix('{') {
            let Some((content, raw)) = self.span_tag(tail, inner, &format!("}}{}", close), 1) else {
                return unclosed(tail);
            };
            return match checked_name(content.trim()) {
                Ok(name) => Token::Tag {
                    kind: TagKind::UnescapedVariable,
                    name,
                    delimiters: self.delimiters,
                    raw,
                },
                Err(message) => Token::Invalid { message, raw },
            };
        }
        if let Some(inner) = after_open.strip_prefix('=') {
            let Some((content, raw)) = self.span_tag(tail, inner, &format!("={}", close), 1) else {
                return unclosed(tail);
            };
            return match maybe_delimiters(content) {
                Ok(new) => {
                    let old = self.delimiters;
                    self.delimiters = new;
                    Token::DelimiterChange { old, new, raw }
                }
                Err(message) => Token::Invalid { message, raw },
            };
        }
        let Some((content, raw)) = self.span_tag(tail, after_open, close, 0) else {
            return unclosed(tail);
        };
        let content = content.trim();
        if let Some(text) = content.strip_prefix('!') {
            return Token::Comment { text, raw };
        }
        let Some(sigil) = content.chars().next() else {
            return Token::Invalid {
                message: "missing tag",
                raw,
            };
        };
        let (kind, name) = match TagKind::from_sigil(sigil) {
            Some(kind) => (kind, content.trim_sigil()),
            None => (TagKind::Variable, content),
        };
        let checked = if kind.is_template_reference() {
            checked_template_name(name)
        } else {
            checked_name(name)
        };
        match checked {
            Ok(name) => Token::Tag {
                kind,
                name,
                delimiters: self.delimiters,
                raw,
            },
            Err(message) => Token::Invalid { message, raw },
        }
    }

    // returns the tag content and the raw tag text
    fn span_tag(&self, tail: &'a str, inner: &'a str, terminator: &str, sigil_len: usize) -> Option<(&'a str, &'a str)> {
        inner.find(terminator).map(|p| {
            let end = self.delimiters.open.len() + sigil_len + p + terminator.len();
            (&inner[..p], &tail[..end])
        })
    }

    fn positioned(&self, token: Token<'a>) -> Positioned<'a> {
        let line_end = self.input[self.line_start..]
            .find('\n')
            .map_or(self.input.len(), |p| self.line_start + p);
        Positioned {
            token,
            file: self.file,
            row: self.row,
            column: self.input[self.line_start..self.pos].chars().count() + 1,
            line: self.input[self.line_start..line_end].trim_end_matches('\r'),
            source: self.input,
            offset: self.pos,
        }
    }

    fn advance(&mut self, len: usize) {
        let consumed = &self.input[self.pos..self.pos + len];
        for (i, c) in consumed.char_indices() {
            if c == '\n' {
                self.row += 1;
                self.line_start = self.pos + i + 1;
            }
        }
        self.pos += len;
    }
}

/// Where `offset` falls in `source`.
pub(crate) fn position_at(file: &str, source: &str, offset: usize) -> SourcePosition {
    let before = &source[..offset];
    let line_start = before.rfind('\n').map_or(0, |p| p + 1);
    let line_end = source[line_start..].find('\n').map_or(source.len(), |p| line_start + p);
    SourcePosition::new(
        file,
        before.matches('\n').count() + 1,
        source[line_start..offset].chars().count() + 1,
        source[line_start..line_end].trim_end_matches('\r'),
    )
}

/// Byte range of the first closing tag of `name` at or after `from`.
/// Text in between is not scanned, so it does not need to be valid.
pub(crate) fn find_close(source: &str, from: usize, name: &str, delimiters: Delimiters<'_>) -> Option<(usize, usize)> {
    let (open, close) = (delimiters.open, delimiters.close);
    let mut at = from;
    while let Some(p) = source[at..].find(open) {
        let start = at + p;
        let inner = &source[start + open.len()..];
        if let Some(len) = inner.find(close) {
            let closes = inner[..len]
                .trim()
                .strip_prefix('/')
                .map_or(false, |rest| rest.trim_start() == name);
            if closes {
                return Some((start, start + open.len() + len + close.len()));
            }
        }
        at = start + open.len();
    }
    None
}

fn unclosed(tail: &str) -> Token<'_> {
    Token::Invalid {
        message: "missing close delimiter",
        raw: tail,
    }
}

fn checked_name(text: &str) -> Result<&str, &'static str> {
    if text == "." {
        Ok(text)
    } else if text.is_empty() {
        Err("missing tag")
    } else if text.starts_with('.')
        || text.ends_with('.')
        || text.contains(char::is_whitespace)
        || text.contains("..")
    {
        Err("invalid tag")
    } else {
        Ok(text)
    }
}

fn checked_template_name(text: &str) -> Result<&str, &'static str> {
    if text.is_empty() {
        Err("missing template name")
    } else if text.contains(char::is_whitespace) {
        Err("invalid template name")
    } else {
        Ok(text)
    }
}

fn maybe_delimiters(text: &str) -> Result<Delimiters<'_>, &'static str> {
    let words = text.split_ascii_whitespace().collect::<Vec<_>>();
    if text.contains('=') || words.len() != 2 {
        Err("invalid delimiters tag")
    } else {
        Ok(Delimiters {
            open: words[0],
            close: words[1],
        })
    }
}

trait ReaderStringOps {
    fn span_text(&self, open_delimiter: &str) -> &str;
    fn span_newline(&self) -> Option<&str>;
    fn span_special(&self) -> Option<&str>;
    fn trim_sigil(&self) -> &str;
}

impl ReaderStringOps for str {
    // text stops before the next tag, line terminator or special character
    fn span_text(&self, open_delimiter: &str) -> &str {
        for (i, c) in self.char_indices().skip(1) {
            let tail = &self[i..];
            if c == '\n' || c == '"' || c == '\\' || tail.starts_with("\r\n") || tail.starts_with(open_delimiter) {
                return &self[..i];
            }
        }
        self
    }

    fn span_newline(&self) -> Option<&str> {
        if self.starts_with("\r\n") {
            Some(&self[..2])
        } else if self.starts_with('\n') {
            Some(&self[..1])
        } else {
            None
        }
    }

    fn span_special(&self) -> Option<&str> {
        if self.starts_with('"') || self.starts_with('\\') {
            Some(&self[..1])
        } else {
            None
        }
    }

    fn trim_sigil(&self) -> &str {
        self[1..].trim_start()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tag<'a>(kind: TagKind, name: &'a str, raw: &'a str) -> Token<'a> {
        Token::Tag {
            kind,
            name,
            delimiters: Delimiters::default(),
            raw,
        }
    }

    #[test]
    fn text_only() {
        expect_sequence(" 123456 ", vec![Token::Text(" 123456 ")]);
    }

    #[test]
    fn lines_are_split() {
        expect_sequence(
            "x\n  {{/a}}  \r\ny",
            vec![
                Token::Text("x"),
                Token::Newline("\n"),
                Token::Text("  "),
                tag(TagKind::EndSection, "a", "{{/a}}"),
                Token::Text("  "),
                Token::Newline("\r\n"),
                Token::Text("y"),
            ],
        )
    }

    #[test]
    fn sections_with_spaces() {
        expect_sequence(
            "{{ # a }}{{^x}}{{{ v }}}{{ / a }}",
            vec![
                tag(TagKind::BeginSection, "a", "{{ # a }}"),
                tag(TagKind::BeginInvertedSection, "x", "{{^x}}"),
                tag(TagKind::UnescapedVariable, "v", "{{{ v }}}"),
                tag(TagKind::EndSection, "a", "{{ / a }}"),
            ],
        )
    }

    #[test]
    fn inheritance_tags() {
        expect_sequence(
            "{{<base}}{{$title}}{{/title}}{{/base}}{{> footer.html }}",
            vec![
                tag(TagKind::BeginParentSection, "base", "{{<base}}"),
                tag(TagKind::BeginBlockSection, "title", "{{$title}}"),
                tag(TagKind::EndSection, "title", "{{/title}}"),
                tag(TagKind::EndSection, "base", "{{/base}}"),
                tag(TagKind::Partial, "footer.html", "{{> footer.html }}"),
            ],
        )
    }

    #[test]
    fn special_characters() {
        expect_sequence(
            "say \"hi\\\"",
            vec![
                Token::Text("say "),
                Token::Special("\""),
                Token::Text("hi"),
                Token::Special("\\"),
                Token::Special("\""),
            ],
        )
    }

    #[test]
    fn comments_may_span_lines() {
        let mut reader = Reader::new("t", "{{! one\ntwo }}\n{{x}}");
        let comment = reader.pop_front().unwrap();
        assert_eq!(
            comment.token,
            Token::Comment {
                text: " one\ntwo",
                raw: "{{! one\ntwo }}"
            }
        );
        let newline = reader.pop_front().unwrap();
        assert_eq!((newline.row, newline.column), (2, 7));
        let variable = reader.pop_front().unwrap();
        assert_eq!((variable.row, variable.column, variable.line), (3, 1, "{{x}}"));
    }

    #[test]
    fn update_delimiters() {
        let old = Delimiters::default();
        let new = Delimiters { open: "<%", close: "%>" };
        expect_sequence(
            "{{= <%   %> =}}<% name %>{{x}}<%={{ }}=%>",
            vec![
                Token::DelimiterChange {
                    old,
                    new,
                    raw: "{{= <%   %> =}}",
                },
                Token::Tag {
                    kind: TagKind::Variable,
                    name: "name",
                    delimiters: new,
                    raw: "<% name %>",
                },
                Token::Text("{{x}}"),
                Token::DelimiterChange {
                    old: new,
                    new: old,
                    raw: "<%={{ }}=%>",
                },
            ],
        )
    }

    #[test]
    fn missing_delimiters_close() {
        expect_error("{{= +++   --- }}", "missing close delimiter");
    }

    #[test]
    fn invalid_delimiters() {
        expect_error("{{= |=   | =}}", "invalid delimiters tag");
        expect_error("{{= | =}}", "invalid delimiters tag");
    }

    #[test]
    fn value_missing_name() {
        expect_error("{{ & }}", "missing tag");
        expect_error("{{}}", "missing tag");
    }

    #[test]
    fn invalid_names() {
        expect_error("{{a..b}}", "invalid tag");
        expect_error("{{#.a}}", "invalid tag");
        expect_error("{{> }}", "missing template name");
    }

    #[test]
    fn unclosed_tag_position() {
        let mut reader = Reader::new("page", "ok\n  {{name");
        let invalid = std::iter::from_fn(|| reader.pop_front())
            .find(|positioned| matches!(positioned.token, Token::Invalid { .. }))
            .unwrap();
        assert_eq!((invalid.row, invalid.column), (2, 3));
        assert_eq!(invalid.line, "  {{name");
        assert_eq!(invalid.token.raw(), "{{name");
    }

    #[test]
    fn invalid_tags_do_not_stop_the_scan() {
        expect_sequence(
            "{{ }}{{a..b}}x",
            vec![
                Token::Invalid {
                    message: "missing tag",
                    raw: "{{ }}",
                },
                Token::Invalid {
                    message: "invalid tag",
                    raw: "{{a..b}}",
                },
                Token::Text("x"),
            ],
        )
    }

    #[test]
    fn raw_text_round_trips() {
        let input = "a {{#s}}\r\n {{! c }}{{{u}}} \"q\" {{=[ ]=}}[/s][&v]\n";
        let mut reader = Reader::new("t", input);
        let mut raw = String::new();
        while let Some(positioned) = reader.pop_front() {
            assert_eq!(&input[positioned.offset..positioned.end()], positioned.token.raw());
            raw.push_str(positioned.token.raw());
        }
        assert_eq!(raw, input);
    }

    #[test]
    fn closing_tags_are_found_without_scanning() {
        let source = "{{#l}}{{a..b}} {{=<% %>=}}{{ / l }}rest";
        let delimiters = Delimiters::default();
        assert_eq!(find_close(source, 6, "l", delimiters), Some((26, 35)));
        assert_eq!(find_close(source, 6, "m", delimiters), None);
        let brackets = Delimiters { open: "<%", close: "%>" };
        assert_eq!(find_close("x<%/l%>", 0, "l", brackets), Some((1, 7)));
    }

    #[test]
    fn rewinding_restores_position_and_delimiters() {
        let input = "{{#l}}\n{{=<% %>=}}\n{{/l}}{{x}}";
        let mut reader = Reader::new("t", input);
        while reader.pop_front().is_some() {}
        reader.rewind(19, Delimiters::default());
        let close = reader.pop_front().unwrap();
        assert!(close.token.is_end_of("l"));
        assert_eq!((close.row, close.column, close.line), (3, 1, "{{/l}}{{x}}"));
        assert_eq!(position_at("t", input, 25), SourcePosition::new("t", 3, 7, "{{/l}}{{x}}"));
    }

    fn expect_sequence(input: &str, tokens: Vec<Token<'_>>) {
        let mut reader = Reader::new("test", input);
        let mut received = Vec::new();
        while let Some(positioned) = reader.pop_front() {
            received.push(positioned.token);
        }
        assert_eq!(received.pop(), Some(Token::EndOfFile));
        assert_eq!(received, tokens);
    }

    fn expect_error(input: &str, message: &str) {
        let mut reader = Reader::new("test", input);
        let invalid = std::iter::from_fn(|| reader.pop_front()).find_map(|positioned| match positioned.token {
            Token::Invalid { message, .. } => Some(message),
            _ => None,
        });
        assert_eq!(invalid, Some(message), "for {:?}", input);
    }
}
