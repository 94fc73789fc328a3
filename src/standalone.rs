use std::collections::VecDeque;

use tracing::trace;

use crate::token::{Positioned, TagKind};

/// How the driver should treat a token of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hint {
    Normal,
    /// Whitespace or line end around a standalone tag, dropped from output.
    Ignore,
    /// Leading whitespace of a standalone line; the next step is the tag.
    Indent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step<'a> {
    pub token: Positioned<'a>,
    pub hint: Hint,
}

impl<'a> Step<'a> {
    fn new(token: Positioned<'a>, hint: Hint) -> Self {
        // end of file is always delivered
        let hint = if token.token.is_eof() { Hint::Normal } else { hint };
        Step { token, hint }
    }
}

pub(crate) type Group<'a> = Vec<Step<'a>>;

const MAX_BUFFERED: usize = 5;

/// Regroups the token stream so that standalone tag lines can be stripped.
///
/// A standalone line is at most five tokens:
///
/// `[ space ] ( {{#tag}} | {{<parent}}{{/parent}} ) [ space ] ( newline | end of file )`
pub(crate) struct Normalizer<'a> {
    buffer: VecDeque<Positioned<'a>>,
    at_start_of_line: bool,
}

impl<'a> Normalizer<'a> {
    pub(crate) fn new() -> Self {
        Normalizer::resumed(true)
    }

    /// A normalizer picking up a stream in the middle of a source.
    pub(crate) fn resumed(at_start_of_line: bool) -> Self {
        Normalizer {
            buffer: VecDeque::with_capacity(MAX_BUFFERED + 1),
            at_start_of_line,
        }
    }

    /// Accepts the next token and returns the groups that became ready.
    pub(crate) fn offer(&mut self, token: Positioned<'a>) -> Vec<Group<'a>> {
        let eof = token.token.is_eof();
        self.buffer.push_back(token);
        let mut groups = Vec::new();
        loop {
            match self.buffer.len() {
                0 => break,
                1 if eof => {
                    groups.push(self.flush_one());
                    break;
                }
                1 => break,
                _ => {}
            }
            if let Some(group) = self.standalone_group() {
                groups.push(group);
            } else if eof || self.buffer.len() > MAX_BUFFERED {
                groups.push(self.flush_one());
            }
            if !eof {
                break;
            }
        }
        groups
    }

    fn flush_one(&mut self) -> Group<'a> {
        match self.buffer.pop_front() {
            Some(token) => {
                self.at_start_of_line = token.token.is_newline_or_eof();
                vec![Step::new(token, Hint::Normal)]
            }
            None => Vec::new(),
        }
    }

    fn standalone_group(&mut self) -> Option<Group<'a>> {
        use Hint::*;
        if !self.at_start_of_line {
            return None;
        }
        let window = self.buffer.iter().take(MAX_BUFFERED).map(|p| p.token).collect::<Vec<_>>();
        let token = |i: usize| window.get(i).copied();
        let (first, second) = (token(0)?, token(1)?);

        let indented = first.is_whitespace();
        let tag = if indented { second } else { first };
        if tag.is_standalone_candidate() {
            let mut hints = if indented { vec![Indent, Normal] } else { vec![Normal] };
            // an empty parent call counts as a single tag
            if let Some((TagKind::BeginParentSection, name)) = tag.tag() {
                if token(hints.len())?.is_end_of(name) {
                    hints.push(Normal);
                }
            }
            if token(hints.len())?.is_whitespace() {
                hints.push(Ignore);
            }
            if token(hints.len())?.is_newline_or_eof() {
                hints.push(Ignore);
                trace!(tokens = hints.len(), indented, "standalone line");
                return Some(self.take(&hints));
            }
        }
        if !(first.is_newline() || first.is_whitespace()) && second.is_standalone_candidate() {
            self.at_start_of_line = false;
            return Some(self.take(&[Normal, Normal]));
        }
        None
    }

    // standalone groups leave the scanner at the start of the next line
    fn take(&mut self, hints: &[Hint]) -> Group<'a> {
        let group = hints
            .iter()
            .filter_map(|hint| self.buffer.pop_front().map(|token| Step::new(token, *hint)))
            .collect::<Vec<_>>();
        if hints.contains(&Hint::Ignore) {
            self.at_start_of_line = true;
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;
    use pretty_assertions::assert_eq;

    fn groups(input: &str) -> Vec<Vec<(String, Hint)>> {
        let mut reader = Reader::new("t", input);
        let mut normalizer = Normalizer::new();
        let mut result = Vec::new();
        while let Some(token) = reader.pop_front() {
            for group in normalizer.offer(token) {
                result.push(
                    group
                        .into_iter()
                        .map(|step| (step.token.token.raw().to_owned(), step.hint))
                        .collect(),
                );
            }
        }
        result
    }

    fn output(input: &str) -> String {
        groups(input)
            .into_iter()
            .flatten()
            .filter(|(_, hint)| *hint == Hint::Normal)
            .map(|(raw, _)| raw)
            .collect()
    }

    #[test]
    fn inline_tags_keep_their_spaces() {
        assert_eq!(
            output(" {{#boolean}}\t|\t{{/boolean}} | \n"),
            " {{#boolean}}\t|\t{{/boolean}} | \n"
        );
    }

    #[test]
    fn standalone_lines_are_removed() {
        assert_eq!(
            output("| This Is\n{{#boolean}}\n|\n{{/boolean}}\n| A Line\n"),
            "| This Is\n{{#boolean}}|\n{{/boolean}}| A Line\n"
        );
    }

    #[test]
    fn indented_standalone_partial() {
        let groups = groups("  {{>p}}  \nx");
        assert_eq!(
            groups[0],
            vec![
                ("  ".to_owned(), Hint::Indent),
                ("{{>p}}".to_owned(), Hint::Normal),
                ("  ".to_owned(), Hint::Ignore),
                ("\n".to_owned(), Hint::Ignore),
            ]
        );
    }

    #[test]
    fn standalone_at_end_of_file() {
        assert_eq!(output("a\n  {{/s}}"), "a\n{{/s}}");
        assert_eq!(output("{{! comment }}\r\nb"), "{{! comment }}b");
    }

    #[test]
    fn two_tags_on_a_line_are_not_standalone() {
        assert_eq!(output("{{#a}}{{/a}}\n"), "{{#a}}{{/a}}\n");
    }

    #[test]
    fn empty_parent_call_is_one_tag() {
        assert_eq!(output("  {{<p}}{{/p}}\nx"), "{{<p}}{{/p}}x");
        assert_eq!(output("{{<p}}{{/q}}\n"), "{{<p}}{{/q}}\n");
    }

    #[test]
    fn variables_are_not_standalone() {
        assert_eq!(output("  {{x}}\n"), "  {{x}}\n");
    }

    #[test]
    fn text_before_tag_is_not_standalone() {
        assert_eq!(output("x {{#a}}\n{{/a}}"), "x {{#a}}\n{{/a}}");
    }

    #[test]
    fn end_of_file_is_delivered_once() {
        let groups = groups("");
        assert_eq!(groups, vec![vec![("".to_owned(), Hint::Normal)]]);
    }
}
