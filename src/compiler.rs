use std::collections::VecDeque;

use tracing::debug;

use crate::config::{CompileOptions, CompileRequest, TemplateSource};
use crate::context::{Binding, Child, ContextStack, ContextType, NodeId};
use crate::error::{CompileError, CompileResult, SourcePosition};
use crate::expr::Expr;
use crate::inheritance::{BlockFilter, Overrides, ParentCapture};
use crate::lambda::{Lambda, ReturnMode};
use crate::program::{Op, Program, ProgramBuilder};
use crate::reader::{find_close, position_at, Reader};
use crate::schema::TypeSchema;
use crate::standalone::{Group, Hint, Normalizer, Step};
use crate::template::{read_resource, TemplateKind, TemplateStack, TemplateStore};
use crate::token::{Positioned, TagKind, Token};

/// Name a lambda template uses to include the body of its section.
pub const SECTION_BODY: &str = "@section";

// reader tokens a group can trail behind
const LOOKAHEAD: usize = 8;

/// Compiles templates against a schema, resolving partials through a store.
///
/// ```
/// use static_mustache::{CompileRequest, Compiler, SchemaRegistry, TemplateMap};
///
/// let schema: SchemaRegistry = serde_yaml::from_str(r#"
///   Greeting:
///     members:
///       - { name: name, type: str }
/// "#).unwrap();
/// let templates = TemplateMap::new();
/// let compiler = Compiler::new(&schema, &templates);
///
/// let request = CompileRequest::inline("hello", "Greeting", "hello, {{name}}!");
/// let program = compiler.compile(&request).unwrap();
///
/// let data = serde_json::json!({ "name": "world" });
/// assert_eq!(program.render(&data), "hello, world!");
/// ```
pub struct Compiler<'c> {
    schema: &'c dyn TypeSchema,
    store: &'c dyn TemplateStore,
}

impl<'c> Compiler<'c> {
    pub fn new(schema: &'c dyn TypeSchema, store: &'c dyn TemplateStore) -> Self {
        Compiler { schema, store }
    }

    pub fn compile(&self, request: &CompileRequest) -> CompileResult<Program> {
        let options = &request.options;
        let text = match &request.source {
            TemplateSource::Inline(text) => text.clone(),
            TemplateSource::Resource(name) => match self.store.get(name, options) {
                Some(template) => template.read(options)?,
                None => read_resource(&options.resource_path(name), options)?,
            },
        };
        let root = TemplateStack::root(&request.name);
        if self.schema.declaration(&request.model).is_none() {
            return Err(CompileError::Type {
                position: SourcePosition::new(&request.name, 1, 1, ""),
                message: format!("unknown model type '{}'", request.model),
                templates: root.to_string(),
            });
        }
        debug!(template = %request.name, model = %request.model, "compiling");
        let mut session = Session {
            schema: self.schema,
            store: self.store,
            options,
            stack: ContextStack::new(self.schema, options, &request.model),
            builder: ProgramBuilder::default(),
            section_bodies: Vec::new(),
        };
        let model = session.stack.model();
        session.run(&root, &request.name, &text, model, "", true, None)?;
        let ops = session.builder.finish();
        debug!(template = %request.name, ops = ops.len(), "compiled");
        Ok(Program {
            name: request.name.clone(),
            model: request.model.clone(),
            charset: options.charset.clone(),
            ops,
        })
    }
}

struct Session<'s> {
    schema: &'s dyn TypeSchema,
    store: &'s dyn TemplateStore,
    options: &'s CompileOptions,
    stack: ContextStack<'s>,
    builder: ProgramBuilder,
    /// Bodies of the lambda sections whose templates are being compiled.
    section_bodies: Vec<String>,
}

enum FrameKind {
    Section,
    Block,
    /// `close` is the offset of the closing tag in the opening tag's source.
    Lambda { lambda: Lambda, body: String, close: usize },
}

/// An open section of the template being compiled.
struct Frame {
    name: String,
    kind: FrameKind,
    node: NodeId,
    mark: usize,
}

/// State of one template file.
struct Run<'t, 'x> {
    templates: &'x TemplateStack<'x>,
    enclosing: NodeId,
    indent: String,
    line_start: bool,
    frames: Vec<Frame>,
    capture: Option<ParentCapture<'t>>,
    overrides: Option<&'t Overrides<'t>>,
    reader: Reader<'t>,
    normalizer: Normalizer<'t>,
    filter: Option<BlockFilter<'t>>,
    /// Filter state after each recent reader token, by offset.
    marks: VecDeque<(usize, BlockFilter<'t>)>,
    /// Set when the reader was moved; pending groups are stale.
    rewound: bool,
}

impl Run<'_, '_> {
    fn current(&self) -> NodeId {
        self.frames.last().map_or(self.enclosing, |f| f.node)
    }

    fn in_lambda(&self) -> Option<&str> {
        match self.frames.last() {
            Some(Frame {
                name,
                kind: FrameKind::Lambda { .. },
                ..
            }) => Some(name.as_str()),
            _ => None,
        }
    }

    fn templates(&self) -> String {
        self.templates.to_string()
    }
}

impl<'s> Session<'s> {
    /// Compiles one template file; returns whether output ended at a line start.
    #[allow(clippy::too_many_arguments)]
    fn run<'t>(
        &mut self, templates: &TemplateStack<'_>, file: &'t str, source: &'t str, enclosing: NodeId,
        indent: &str, line_start: bool, overrides: Option<&'t Overrides<'t>>,
    ) -> CompileResult<bool> {
        let mut run = Run {
            templates,
            enclosing,
            indent: indent.to_owned(),
            line_start,
            frames: Vec::new(),
            capture: None,
            overrides,
            reader: Reader::new(file, source),
            normalizer: Normalizer::new(),
            filter: overrides.map(BlockFilter::new),
            marks: VecDeque::with_capacity(LOOKAHEAD),
            rewound: false,
        };
        while let Some(token) = run.reader.pop_front() {
            let tokens = match run.filter.as_mut() {
                Some(filter) => {
                    let tokens = filter.filter(token);
                    if run.marks.len() == LOOKAHEAD {
                        run.marks.pop_front();
                    }
                    run.marks.push_back((token.offset, *filter));
                    tokens
                }
                None => vec![token],
            };
            'tokens: for token in tokens {
                for group in run.normalizer.offer(token) {
                    self.group(&mut run, group)?;
                    if std::mem::take(&mut run.rewound) {
                        break 'tokens;
                    }
                }
            }
        }
        Ok(run.line_start)
    }

    fn group<'t>(&mut self, run: &mut Run<'t, '_>, group: Group<'t>) -> CompileResult<()> {
        let rest = match run.in_lambda() {
            Some(name) => {
                let name = name.to_owned();
                self.lambda_group(run, &name, group)?
            }
            None => group,
        };
        let standalone = rest.iter().any(|step| step.hint != Hint::Normal);
        let mut indent = "";
        let mut steps = rest.into_iter();
        while let Some(Step { token, hint }) = steps.next() {
            if run.capture.is_some() {
                // blocks keep their whitespace; it is normalized again where they are replayed
                self.token(run, token, "")?;
                continue;
            }
            match hint {
                Hint::Ignore => continue,
                Hint::Indent => {
                    if let Token::Text(text) = token.token {
                        indent = text;
                    }
                    continue;
                }
                Hint::Normal => {}
            }
            let pending = if token.token.is_indentable() { indent } else { "" };
            indent = "";
            let open = run.frames.len();
            self.token(run, token, pending)?;
            if run.frames.len() > open && run.in_lambda().is_some() {
                if standalone {
                    run.line_start = true;
                }
                let rest = steps.collect::<Vec<_>>();
                let body_start = rest
                    .iter()
                    .take_while(|step| step.hint == Hint::Ignore)
                    .last()
                    .map_or(token.end(), |step| step.token.end());
                if self.lambda_body(run, &token, body_start)? {
                    return Ok(());
                }
                return self.group(run, rest);
            }
        }
        if standalone {
            run.line_start = true;
        }
        Ok(())
    }

    /// Cuts the raw body of the lambda section `open` just opened out of its
    /// source. Returns true when the reader was moved to the closing tag.
    fn lambda_body<'t>(
        &mut self, run: &mut Run<'t, '_>, open: &Positioned<'t>, body_start: usize,
    ) -> CompileResult<bool> {
        let Token::Tag { name, delimiters, .. } = open.token else {
            return Ok(false);
        };
        let source = open.source;
        let Some((close_start, close_end)) = find_close(source, body_start, name, delimiters) else {
            return Err(CompileError::unmatched(
                position_at(open.file, source, source.len()),
                format!("EOF reached before closing tag of lambda \"{}\"", name),
                run.templates(),
            ));
        };
        let at_line_start = |offset: usize| offset == 0 || source[..offset].ends_with('\n');
        let before = &source[body_start..close_start];
        let indent_start = close_start - (before.len() - before.trim_end_matches(is_blank).len());
        let after = source[close_end..].trim_start_matches(is_blank);
        let standalone_end =
            at_line_start(indent_start) && (after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n"));
        let resume = if standalone_end { indent_start } else { close_start };
        if let Some(Frame {
            kind: FrameKind::Lambda { body, close, .. },
            ..
        }) = run.frames.last_mut()
        {
            *body = source[body_start..resume].to_owned();
            *close = close_start;
        }
        // replayed block tokens were scanned by the caller and are skipped instead
        if !run.reader.owns(open) {
            return Ok(false);
        }
        run.reader.rewind(resume, delimiters);
        run.normalizer = Normalizer::resumed(at_line_start(resume));
        if let Some(&(_, filter)) = run.marks.iter().find(|(offset, _)| *offset == open.offset) {
            run.filter = Some(filter);
        }
        run.marks.clear();
        run.rewound = true;
        Ok(true)
    }

    // Skips what is left of the open lambda's body. Steps after its closing
    // tag are handed back.
    fn lambda_group<'t>(
        &mut self, run: &mut Run<'t, '_>, name: &str, group: Group<'t>,
    ) -> CompileResult<Group<'t>> {
        let close = match run.frames.last() {
            Some(Frame {
                kind: FrameKind::Lambda { close, .. },
                ..
            }) => *close,
            _ => return Ok(group),
        };
        let mut steps = group.into_iter();
        while let Some(step) = steps.next() {
            let token = step.token;
            if token.token.is_end_of(name) && token.offset == close {
                self.end_lambda(run, &token)?;
                return Ok(steps.collect());
            }
            if token.token.is_eof() {
                return Err(CompileError::unmatched(
                    token.position(),
                    format!("EOF reached before closing tag of lambda \"{}\"", name),
                    run.templates(),
                ));
            }
        }
        Ok(Vec::new())
    }

    fn token<'t>(&mut self, run: &mut Run<'t, '_>, token: Positioned<'t>, indent: &'t str) -> CompileResult<()> {
        if let Some(capture) = run.capture.as_mut() {
            if capture.feed(token)? {
                if let Some(capture) = run.capture.take() {
                    self.parent(run, capture)?;
                }
            }
            return Ok(());
        }
        match token.token {
            Token::Text(text) | Token::Special(text) => {
                self.start_line(run);
                self.builder.literal(text);
            }
            Token::Newline(text) => {
                self.builder.literal(text);
                run.line_start = true;
            }
            Token::Comment { .. } | Token::DelimiterChange { .. } => {}
            Token::Invalid { message, .. } => {
                return Err(CompileError::lex(token.position(), message, run.templates()));
            }
            Token::EndOfFile => {
                if let Some(frame) = run.frames.last() {
                    return Err(CompileError::unmatched(
                        token.position(),
                        format!("Unclosed \"{}\" block at end of file", frame.name),
                        run.templates(),
                    ));
                }
            }
            Token::Tag { kind, name, .. } => match kind {
                TagKind::BeginSection => self.section(run, &token, name, ContextType::Section)?,
                TagKind::BeginInvertedSection => self.section(run, &token, name, ContextType::Inverted)?,
                TagKind::BeginBlockSection => {
                    let mark = self.stack.mark();
                    let node = self.child(run, &token, name, ContextType::Template)?;
                    run.frames.push(Frame {
                        name: name.to_owned(),
                        kind: FrameKind::Block,
                        node,
                        mark,
                    });
                }
                TagKind::BeginParentSection => {
                    run.capture = Some(ParentCapture::new(token, name, indent, run.templates()));
                }
                TagKind::EndSection => self.end_section(run, &token, name)?,
                TagKind::Partial => self.partial(run, &token, name, indent)?,
                TagKind::Variable => self.variable(run, &token, name, true)?,
                TagKind::UnescapedVariable => self.variable(run, &token, name, false)?,
            },
        }
        Ok(())
    }

    fn start_line(&mut self, run: &mut Run<'_, '_>) {
        if run.line_start {
            self.builder.literal(&run.indent);
            run.line_start = false;
        }
    }

    fn child(
        &mut self, run: &Run<'_, '_>, token: &Positioned<'_>, name: &str, context_type: ContextType,
    ) -> CompileResult<NodeId> {
        match self.stack.child(run.current(), name, context_type) {
            Ok(Child::Data(node)) => Ok(node),
            Ok(Child::Lambda { node, .. }) => Ok(node),
            Err(error) => Err(error.at(token.position(), &run.templates())),
        }
    }

    fn section(
        &mut self, run: &mut Run<'_, '_>, token: &Positioned<'_>, name: &str, context_type: ContextType,
    ) -> CompileResult<()> {
        let mark = self.stack.mark();
        let enclosing = run.current();
        let child = self
            .stack
            .child(enclosing, name, context_type)
            .map_err(|error| error.at(token.position(), &run.templates()))?;
        let (node, kind) = match child {
            Child::Data(node) => {
                self.builder.extend(self.stack.begin_ops(node));
                (node, FrameKind::Section)
            }
            Child::Lambda { node, decl, target } => {
                let context = self.stack.current(enclosing).cloned();
                let lambda = Lambda::plan(self.schema, decl, target.expr, context.as_ref())
                    .map_err(|error| error.at(token.position(), &run.templates()))?;
                debug!(lambda = name, method = %lambda.method, "lambda section");
                let kind = FrameKind::Lambda {
                    lambda,
                    body: String::new(),
                    close: 0,
                };
                (node, kind)
            }
        };
        run.frames.push(Frame {
            name: name.to_owned(),
            kind,
            node,
            mark,
        });
        Ok(())
    }

    fn end_section(&mut self, run: &mut Run<'_, '_>, token: &Positioned<'_>, name: &str) -> CompileResult<()> {
        match run.frames.last() {
            None => {
                return Err(CompileError::unmatched(
                    token.position(),
                    format!("Closing \"{}\" block when no block is currently open", name),
                    run.templates(),
                ))
            }
            Some(frame) if frame.name != name => {
                return Err(CompileError::unmatched(
                    token.position(),
                    format!("Closing {} block instead of {}", name, frame.name),
                    run.templates(),
                ))
            }
            Some(_) => {}
        }
        if let Some(frame) = run.frames.pop() {
            self.builder.extend(self.stack.end_ops(frame.node));
            self.stack.truncate(frame.mark);
        }
        Ok(())
    }

    fn end_lambda(&mut self, run: &mut Run<'_, '_>, token: &Positioned<'_>) -> CompileResult<()> {
        let Some(frame) = run.frames.pop() else {
            return Ok(());
        };
        let FrameKind::Lambda { lambda, body, .. } = frame.kind else {
            return Ok(());
        };
        let call = lambda.call(&body);
        debug!(lambda = %lambda.name, mode = ?lambda.returns, at = %token.position(), "lambda call");
        match &lambda.returns {
            ReturnMode::RawString => {
                self.start_line(run);
                self.builder.push(Op::AppendValue {
                    path: lambda.name.clone(),
                    expr: call,
                    escaped: false,
                });
            }
            ReturnMode::Model(ty) => {
                let var = self.stack.variable(frame.node, &lambda.name);
                let scope = self.stack.open_scope(frame.node);
                self.builder.push(Op::Bind {
                    var: var.clone(),
                    expr: call,
                });
                let bound = self.stack.bind_model(scope, Binding::new(Expr::Var(var), ty.clone()));
                self.builder.extend(self.stack.begin_ops(bound));
                let source = match &lambda.template {
                    Some(template) => {
                        self.section_bodies.push(body);
                        template.clone()
                    }
                    None => body,
                };
                let templates = run.templates;
                let nested = templates.push(&lambda.name, TemplateKind::Lambda);
                let result = self.run(&nested, &lambda.name, &source, bound, &run.indent, run.line_start, None);
                if lambda.template.is_some() {
                    self.section_bodies.pop();
                }
                run.line_start = result?;
                self.builder.extend(self.stack.end_ops(bound));
                self.builder.push(Op::Unbind);
            }
        }
        self.stack.truncate(frame.mark);
        Ok(())
    }

    fn variable(
        &mut self, run: &mut Run<'_, '_>, token: &Positioned<'_>, name: &str, escaped: bool,
    ) -> CompileResult<()> {
        let mark = self.stack.mark();
        let node = self.child(run, token, name, ContextType::Var)?;
        let binding = self
            .stack
            .renderable(node, name)
            .map_err(|error| error.at(token.position(), &run.templates()))?;
        self.start_line(run);
        self.builder.extend(self.stack.begin_ops(node));
        self.builder.push(Op::AppendValue {
            path: name.to_owned(),
            expr: binding.expr,
            escaped,
        });
        self.builder.extend(self.stack.end_ops(node));
        self.stack.truncate(mark);
        Ok(())
    }

    fn template_text(&self, run: &Run<'_, '_>, position: SourcePosition, name: &str) -> CompileResult<String> {
        if let Some(chain) = run.templates.cycle_to(name) {
            return Err(CompileError::RecursiveTemplate {
                position,
                chain,
                templates: run.templates(),
            });
        }
        if name == SECTION_BODY {
            if let Some(body) = self.section_bodies.last() {
                return Ok(body.clone());
            }
        }
        match self.store.get(name, self.options) {
            Some(template) => template.read(self.options),
            None => Err(CompileError::TemplateNotFound {
                position,
                name: name.to_owned(),
                templates: run.templates(),
            }),
        }
    }

    fn partial(&mut self, run: &mut Run<'_, '_>, token: &Positioned<'_>, name: &str, indent: &str) -> CompileResult<()> {
        let text = self.template_text(run, token.position(), name)?;
        let indent = format!("{}{}", run.indent, indent);
        debug!(partial = name, indent = %indent, "expanding partial");
        let mark = self.stack.mark();
        let node = self.child(run, token, name, ContextType::Template)?;
        self.builder.push(Op::InvokePartial(name.to_owned()));
        let templates = run.templates;
        let nested = templates.push(name, TemplateKind::Partial);
        run.line_start = self.run(&nested, name, &text, node, &indent, run.line_start, None)?;
        self.builder.push(Op::EndPartial);
        self.stack.truncate(mark);
        Ok(())
    }

    fn parent<'t>(&mut self, run: &mut Run<'t, '_>, capture: ParentCapture<'t>) -> CompileResult<()> {
        let token = *capture.position();
        let name = capture.name;
        let text = self.template_text(run, token.position(), name)?;
        let indent = format!("{}{}", run.indent, capture.indent);
        debug!(parent = name, indent = %indent, "expanding parent");
        let mark = self.stack.mark();
        let node = self.child(run, &token, name, ContextType::Template)?;
        self.builder.push(Op::InvokePartial(name.to_owned()));
        let overrides = Overrides::new(capture.into_blocks(), run.overrides);
        let templates = run.templates;
        let nested = templates.push(name, TemplateKind::Parent);
        run.line_start = self.run(&nested, name, &text, node, &indent, run.line_start, Some(&overrides))?;
        self.builder.push(Op::EndPartial);
        self.stack.truncate(mark);
        Ok(())
    }
}

fn is_blank(c: char) -> bool {
    c.is_whitespace() && c != '\n' && c != '\r'
}
