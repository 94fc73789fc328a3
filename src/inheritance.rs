//! Parent templates and block overrides.
//!
//! `{{<parent}}...{{/parent}}` collects the blocks given at the call site,
//! then `parent` is compiled with a [BlockFilter] that swaps the content of
//! each overridden `{{$block}}...{{/block}}` for the caller's tokens.

use tracing::{debug, trace};

use crate::error::{CompileError, CompileResult};
use crate::token::{Positioned, TagKind, Token};

pub(crate) type Block<'a> = (&'a str, Vec<Positioned<'a>>);

/// Blocks of one parent call, chained to the blocks of the enclosing call
/// when the caller is itself a parent template.
#[derive(Debug)]
pub(crate) struct Overrides<'a> {
    blocks: Vec<Block<'a>>,
    caller: Option<&'a Overrides<'a>>,
}

impl<'a> Overrides<'a> {
    pub(crate) fn new(blocks: Vec<Block<'a>>, caller: Option<&'a Overrides<'a>>) -> Self {
        Overrides { blocks, caller }
    }

    /// The closest override for a block, local blocks first.
    pub(crate) fn find(&self, name: &str) -> Option<&[Positioned<'a>]> {
        std::iter::successors(Some(self), |o| o.caller).find_map(|o| {
            o.blocks
                .iter()
                .find(|(block, _)| *block == name)
                .map(|(_, tokens)| tokens.as_slice())
        })
    }
}

/// Collects the blocks of a parent call from the caller's tokens.
#[derive(Debug)]
pub(crate) struct ParentCapture<'a> {
    pub(crate) name: &'a str,
    pub(crate) indent: String,
    position: Positioned<'a>,
    templates: String,
    blocks: Vec<Block<'a>>,
    /// Sections open inside the parent tag.
    sections: Vec<&'a str>,
    /// Index of the block being captured.
    current: Option<usize>,
}

impl<'a> ParentCapture<'a> {
    pub(crate) fn new(position: Positioned<'a>, name: &'a str, indent: &str, templates: String) -> Self {
        debug!(parent = name, indent, "capturing blocks");
        ParentCapture {
            name,
            indent: indent.to_owned(),
            position,
            templates,
            blocks: Vec::new(),
            sections: Vec::new(),
            current: None,
        }
    }

    /// Takes the next token; true once the closing parent tag was seen.
    pub(crate) fn feed(&mut self, token: Positioned<'a>) -> CompileResult<bool> {
        if token.token.is_eof() {
            return Err(CompileError::unmatched(
                token.position(),
                format!("Unclosed \"{}\" block at end of file", self.name),
                self.templates.as_str(),
            ));
        }
        if let Token::Invalid { message, .. } = token.token {
            return Err(CompileError::lex(token.position(), message, self.templates.as_str()));
        }
        match token.token.tag() {
            Some((kind, name)) if kind.is_begin() => {
                if self.sections.is_empty() && kind == TagKind::BeginBlockSection {
                    if self.blocks.iter().any(|(block, _)| *block == name) {
                        return Err(CompileError::DuplicateBlock {
                            position: token.position(),
                            name: name.to_owned(),
                            templates: self.templates.clone(),
                        });
                    }
                    trace!(parent = self.name, block = name, "block");
                    self.blocks.push((name, Vec::new()));
                    self.current = Some(self.blocks.len() - 1);
                    self.sections.push(name);
                    return Ok(false);
                }
                self.sections.push(name);
            }
            Some((TagKind::EndSection, name)) => match self.sections.last() {
                None if name == self.name => return Ok(true),
                None => return Err(self.mismatch(&token, name, self.name)),
                Some(open) if *open != name => return Err(self.mismatch(&token, name, open)),
                Some(_) => {
                    self.sections.pop();
                    if self.sections.is_empty() {
                        self.current = None;
                        return Ok(false);
                    }
                }
            },
            _ => {}
        }
        if let Some(index) = self.current {
            self.blocks[index].1.push(token);
        }
        Ok(false)
    }

    fn mismatch(&self, token: &Positioned<'a>, name: &str, open: &str) -> CompileError {
        CompileError::unmatched(
            token.position(),
            format!("Closing {} block instead of {}", name, open),
            self.templates.as_str(),
        )
    }

    pub(crate) fn position(&self) -> &Positioned<'a> {
        &self.position
    }

    pub(crate) fn into_blocks(self) -> Vec<Block<'a>> {
        self.blocks
    }
}

/// Replaces overridden blocks in the raw token stream of a parent template.
///
/// The block tags themselves are kept so that standalone block lines are
/// still recognized.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockFilter<'a> {
    overrides: &'a Overrides<'a>,
    depth: usize,
    /// Overridden block being skipped and the depth it was opened at.
    skipping: Option<(&'a str, usize)>,
}

impl<'a> BlockFilter<'a> {
    pub(crate) fn new(overrides: &'a Overrides<'a>) -> Self {
        BlockFilter {
            overrides,
            depth: 0,
            skipping: None,
        }
    }

    pub(crate) fn filter(&mut self, token: Positioned<'a>) -> Vec<Positioned<'a>> {
        if token.token.is_eof() {
            return vec![token];
        }
        let tag = token.token.tag();
        if let Some((kind, name)) = tag {
            if kind.is_begin() {
                self.depth += 1;
            } else if kind == TagKind::EndSection {
                self.depth = self.depth.saturating_sub(1);
            }
            match self.skipping {
                Some((block, depth)) if kind == TagKind::EndSection && name == block && depth == self.depth => {
                    trace!(block, "end of overridden block");
                    self.skipping = None;
                    return vec![token];
                }
                Some(_) => return Vec::new(),
                None => {}
            }
            if kind == TagKind::BeginBlockSection {
                if let Some(tokens) = self.overrides.find(name) {
                    debug!(block = name, tokens = tokens.len(), "replaying block");
                    self.skipping = Some((name, self.depth - 1));
                    let mut replay = Vec::with_capacity(tokens.len() + 1);
                    replay.push(token);
                    replay.extend_from_slice(tokens);
                    return replay;
                }
            }
            return vec![token];
        }
        match self.skipping {
            Some(_) => Vec::new(),
            None => vec![token],
        }
    }
}
