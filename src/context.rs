//! Compile-time binding contexts.
//!
//! Contexts live in an arena and point at their parent by index. A context is
//! pushed when a tag asks for a child binding and the arena is truncated back
//! when the matching close tag is processed.

use std::fmt::Write;

use tracing::debug;

use crate::config::CompileOptions;
use crate::error::{AccessViolation, BindError};
use crate::expr::{Expr, Test};
use crate::program::{LoopKind, Op};
use crate::schema::{LambdaDecl, MemberDecl, MemberKind, TypeRef, TypeSchema, Visibility};

pub(crate) type NodeId = usize;

/// An expression together with its static type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub expr: Expr,
    pub ty: TypeRef,
}

impl Binding {
    pub fn new(expr: Expr, ty: TypeRef) -> Self {
        Binding { expr, ty }
    }
}

/// What a name is being bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextType {
    /// `{{name}}` and `{{{name}}}`.
    Var,
    Section,
    Inverted,
    /// A non-final segment of a dotted name.
    Path,
    /// The element of a loop.
    Element,
    /// Partial, parent and block tags; they do not bind data.
    Template,
}

#[derive(Debug, Clone)]
enum ContextKind {
    Root,
    /// The current context as seen by a nested tag.
    Owned,
    Variables { depth: usize },
    Boolean { test: Test },
    BoundObject { binding: Binding },
    Enum { binding: Binding },
    MapLike { binding: Binding, node: bool },
    Loop {
        source: Binding,
        element: Option<String>,
        index: String,
        kind: LoopKind,
    },
    Optional { binding: Binding },
    Lambda { name: String },
    Inverted { test: Test },
    NoData { binding: Binding },
}

#[derive(Debug, Clone)]
struct Context {
    kind: ContextKind,
    parent: Option<NodeId>,
}

/// Result of looking a name up in one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(Binding),
    NotFound,
    Inaccessible(AccessViolation),
}

/// A resolved section, variable or template tag.
pub(crate) enum Child<'s> {
    Data(NodeId),
    Lambda {
        node: NodeId,
        decl: &'s LambdaDecl,
        target: Binding,
    },
}

pub(crate) struct ContextStack<'s> {
    schema: &'s dyn TypeSchema,
    options: &'s CompileOptions,
    nodes: Vec<Context>,
}

impl<'s> ContextStack<'s> {
    pub(crate) fn new(schema: &'s dyn TypeSchema, options: &'s CompileOptions, model: &str) -> Self {
        let mut stack = ContextStack {
            schema,
            options,
            nodes: Vec::new(),
        };
        let root = stack.push(ContextKind::Root, None);
        stack.push(
            ContextKind::BoundObject {
                binding: Binding::new(Expr::Root, TypeRef::named(model)),
            },
            Some(root),
        );
        stack
    }

    /// The context bound to the root model.
    pub(crate) fn model(&self) -> NodeId {
        1
    }

    pub(crate) fn mark(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn truncate(&mut self, mark: usize) {
        self.nodes.truncate(mark.max(2));
    }

    fn push(&mut self, kind: ContextKind, parent: Option<NodeId>) -> NodeId {
        self.nodes.push(Context { kind, parent });
        self.nodes.len() - 1
    }

    fn child_of(&mut self, parent: NodeId, kind: ContextKind) -> NodeId {
        self.push(kind, Some(parent))
    }

    /// Binds `expr` as a model variable, e.g. the result of a lambda.
    pub(crate) fn bind_model(&mut self, parent: NodeId, binding: Binding) -> NodeId {
        let guard = self.child_of(
            parent,
            ContextKind::Boolean {
                test: Test::NotNull(binding.expr.clone()),
            },
        );
        self.child_of(guard, ContextKind::BoundObject { binding })
    }

    /// The value the context stands for.
    pub(crate) fn current(&self, id: NodeId) -> Option<&Binding> {
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            let node = &self.nodes[n];
            match &node.kind {
                ContextKind::BoundObject { binding }
                | ContextKind::Enum { binding }
                | ContextKind::MapLike { binding, .. }
                | ContextKind::Optional { binding }
                | ContextKind::NoData { binding }
                | ContextKind::Loop { source: binding, .. } => return Some(binding),
                ContextKind::Root => return None,
                _ => cursor = node.parent,
            }
        }
        None
    }

    /// Ops entering the context, outermost first, up to the owning context.
    pub(crate) fn begin_ops(&self, id: NodeId) -> Vec<Op> {
        let node = &self.nodes[id];
        let own = match &node.kind {
            ContextKind::Root | ContextKind::Owned | ContextKind::Lambda { .. } => return Vec::new(),
            ContextKind::Inverted { test } => return vec![Op::OpenConditional(test.clone())],
            ContextKind::Boolean { test } => Some(Op::OpenConditional(test.clone())),
            ContextKind::Optional { binding } => Some(Op::OpenConditional(Test::Present(binding.expr.clone()))),
            ContextKind::Loop {
                source,
                element,
                index,
                kind,
            } => Some(Op::OpenLoop {
                source: source.expr.clone(),
                element: element.clone(),
                index: index.clone(),
                kind: *kind,
            }),
            _ => None,
        };
        let mut ops = node.parent.map(|p| self.begin_ops(p)).unwrap_or_default();
        ops.extend(own);
        ops
    }

    /// Ops leaving the context, innermost first.
    pub(crate) fn end_ops(&self, id: NodeId) -> Vec<Op> {
        let node = &self.nodes[id];
        let own = match &node.kind {
            ContextKind::Root | ContextKind::Owned | ContextKind::Lambda { .. } => return Vec::new(),
            ContextKind::Inverted { .. } => return vec![Op::CloseConditional],
            ContextKind::Boolean { .. } | ContextKind::Optional { .. } => Some(Op::CloseConditional),
            ContextKind::Loop { .. } => Some(Op::CloseLoop),
            _ => None,
        };
        let mut ops = own.into_iter().collect::<Vec<_>>();
        ops.extend(node.parent.map(|p| self.end_ops(p)).unwrap_or_default());
        ops
    }

    /// Resolves `name` for a tag of the given type, pushing the contexts it needs.
    pub(crate) fn child(
        &mut self, enclosing: NodeId, name: &str, context_type: ContextType,
    ) -> Result<Child<'s>, BindError> {
        let owned = self.child_of(enclosing, ContextKind::Owned);
        if context_type == ContextType::Template {
            return Ok(Child::Data(owned));
        }
        if name == "." {
            return match context_type {
                ContextType::Inverted => Err(BindError::Type(
                    "the current context can't be inverted".to_owned(),
                )),
                ContextType::Section => {
                    let binding = self
                        .current(owned)
                        .cloned()
                        .ok_or_else(|| BindError::Type("no current context".to_owned()))?;
                    Ok(Child::Data(self.bind(ContextType::Section, binding, owned)?))
                }
                _ => Ok(Child::Data(owned)),
            };
        }
        let segments = name.split('.').collect::<Vec<_>>();
        if context_type == ContextType::Inverted {
            return self.inverted_child(owned, name, &segments);
        }
        let last = segments.len() - 1;
        let first_type = if last == 0 { context_type } else { ContextType::Path };
        let first = match self.find_first(owned, segments[0], name, first_type == ContextType::Section)? {
            First::Binding(binding) => binding,
            First::Lambda(decl, target) => {
                let node = self.child_of(
                    owned,
                    ContextKind::Lambda {
                        name: name.to_owned(),
                    },
                );
                return Ok(Child::Lambda { node, decl, target });
            }
        };
        let mut node = self.bind(first_type, first, owned)?;
        for (i, segment) in segments.iter().enumerate().skip(1) {
            let segment_type = if i == last { context_type } else { ContextType::Path };
            let binding = match self.get(node, segment) {
                Lookup::Found(binding) => binding,
                Lookup::Inaccessible(access) => return Err(inaccessible(segment, access)),
                Lookup::NotFound => return Err(self.not_found(node, name)),
            };
            node = self.bind(segment_type, binding, node)?;
        }
        Ok(Child::Data(node))
    }

    fn inverted_child(&mut self, owned: NodeId, name: &str, segments: &[&str]) -> Result<Child<'s>, BindError> {
        let first = match self.find_first(owned, segments[0], name, false)? {
            First::Binding(binding) => binding,
            First::Lambda(..) => return Err(self.not_found(owned, name)),
        };
        let last = match segments.len() {
            1 => first,
            len => {
                let mut node = self.bind(ContextType::Path, first, owned)?;
                let mut last = None;
                for (i, segment) in segments.iter().enumerate().skip(1) {
                    let binding = match self.get(node, segment) {
                        Lookup::Found(binding) => binding,
                        Lookup::Inaccessible(access) => return Err(inaccessible(segment, access)),
                        Lookup::NotFound if self.options.strict_broken_chain => {
                            return Err(self.not_found(node, name))
                        }
                        Lookup::NotFound => {
                            debug!(name, segment, "broken chain in inverted section");
                            let node = self.child_of(owned, ContextKind::Inverted { test: Test::Const(true) });
                            return Ok(Child::Data(node));
                        }
                    };
                    if i == len - 1 {
                        last = Some(binding);
                    } else {
                        node = self.bind(ContextType::Path, binding, node)?;
                    }
                }
                let mut tests = Vec::new();
                for op in self.begin_ops(node) {
                    match op {
                        Op::OpenConditional(test) => tests.push(Test::not(test)),
                        Op::OpenLoop { .. } => {
                            return Err(BindError::Type(format!(
                                "inverted section '{}' can't traverse a collection",
                                name
                            )))
                        }
                        _ => {}
                    }
                }
                let last = last.ok_or_else(|| self.not_found(node, name))?;
                tests.push(self.inverted_test(&last)?);
                let test = if tests.len() == 1 { tests.remove(0) } else { Test::Any(tests) };
                return Ok(Child::Data(self.child_of(owned, ContextKind::Inverted { test })));
            }
        };
        let test = self.inverted_test(&last)?;
        Ok(Child::Data(self.child_of(owned, ContextKind::Inverted { test })))
    }

    // structural bindings anywhere on the stack, then lambdas, then map keys
    fn find_first(
        &self, owned: NodeId, segment: &str, name: &str, lambdas: bool,
    ) -> Result<First<'s>, BindError> {
        match self.find(owned, segment, false) {
            Lookup::Found(binding) => return Ok(First::Binding(binding)),
            Lookup::Inaccessible(access) => return Err(inaccessible(segment, access)),
            Lookup::NotFound => {}
        }
        if lambdas {
            if let Some((decl, target)) = self.find_lambda(owned, segment) {
                return Ok(First::Lambda(decl, target));
            }
        }
        match self.find(owned, segment, true) {
            Lookup::Found(binding) => Ok(First::Binding(binding)),
            Lookup::Inaccessible(access) => Err(inaccessible(segment, access)),
            Lookup::NotFound => Err(self.not_found(owned, name)),
        }
    }

    /// Searches the context and its ancestors.
    pub(crate) fn find(&self, id: NodeId, name: &str, include_maps: bool) -> Lookup {
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            let node = &self.nodes[n];
            let skip = !include_maps && matches!(node.kind, ContextKind::MapLike { .. });
            if !skip {
                match self.own(n, name) {
                    Lookup::NotFound => {}
                    found => return found,
                }
            }
            cursor = node.parent;
        }
        Lookup::NotFound
    }

    /// Looks `name` up against the value bound at `id` only.
    pub(crate) fn get(&self, id: NodeId, name: &str) -> Lookup {
        self.own(id, name)
    }

    fn own(&self, id: NodeId, name: &str) -> Lookup {
        match &self.nodes[id].kind {
            ContextKind::BoundObject { binding } => self.member(binding, name),
            ContextKind::Enum { binding } => match self.member(binding, name) {
                Lookup::NotFound if self.schema.enum_constants(&binding.ty).iter().any(|c| c == name) => {
                    Lookup::Found(Binding::new(
                        Expr::EnumIs {
                            target: Box::new(binding.expr.clone()),
                            constant: name.to_owned(),
                        },
                        TypeRef::Bool,
                    ))
                }
                other => other,
            },
            ContextKind::MapLike { binding, node } => {
                let ty = match (&binding.ty, node) {
                    (TypeRef::Map(value), false) => (**value).clone(),
                    _ => TypeRef::Node,
                };
                Lookup::Found(Binding::new(Expr::key(&binding.expr, name), ty))
            }
            ContextKind::Loop { index, .. } => {
                let index = index.clone();
                let (expr, ty) = match name {
                    "-first" | "@first" => (Expr::First { index }, TypeRef::Bool),
                    "-last" | "@last" => (Expr::Last { index }, TypeRef::Bool),
                    "-index" => (Expr::Position { index, one_based: true }, TypeRef::Int),
                    "@index" => (Expr::Position { index, one_based: false }, TypeRef::Int),
                    _ => return Lookup::NotFound,
                };
                Lookup::Found(Binding::new(expr, ty))
            }
            _ => Lookup::NotFound,
        }
    }

    // method `name`, then getter `getName`, then field `name`
    fn member(&self, binding: &Binding, name: &str) -> Lookup {
        let members = self.schema.members(&binding.ty);
        let method = |method_name: &str| {
            members
                .iter()
                .find(|m| m.kind == MemberKind::Method && m.params == 0 && m.name == method_name)
                .copied()
        };
        let getter = format!("get{}", capitalize(name));
        let candidate = method(name).or_else(|| method(&getter)).or_else(|| {
            members
                .iter()
                .find(|m| m.kind == MemberKind::Field && m.name == name)
                .copied()
        });
        match candidate {
            Some(member) => match access_violation(member) {
                Some(violation) => Lookup::Inaccessible(violation),
                None => Lookup::Found(Binding::new(
                    Expr::member(&binding.expr, &member.name, name, member.kind == MemberKind::Method),
                    member.ty.clone(),
                )),
            },
            None => Lookup::NotFound,
        }
    }

    fn find_lambda(&self, id: NodeId, name: &str) -> Option<(&'s LambdaDecl, Binding)> {
        let schema = self.schema;
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            let node = &self.nodes[n];
            if let ContextKind::BoundObject { binding } | ContextKind::Enum { binding } = &node.kind {
                if let Some(decl) = schema.lambdas(&binding.ty).iter().find(|l| l.name() == name) {
                    return Some((decl, binding.clone()));
                }
            }
            cursor = node.parent;
        }
        None
    }

    /// Creates the contexts a value of the binding's type needs.
    fn bind(&mut self, context_type: ContextType, binding: Binding, parent: NodeId) -> Result<NodeId, BindError> {
        use ContextType::*;
        let is_var = matches!(context_type, Var | Element);
        let node = match binding.ty.clone() {
            TypeRef::Node if context_type == Section => {
                let (scope, depth) = self.scope(parent);
                let element = format!("node{}", depth);
                let loop_node = self.child_of(
                    scope,
                    ContextKind::Loop {
                        source: binding,
                        element: Some(element.clone()),
                        index: format!("i{}", depth),
                        kind: LoopKind::Node,
                    },
                );
                self.bind(Element, Binding::new(Expr::Var(element), TypeRef::Node), loop_node)?
            }
            TypeRef::Node => self.child_of(parent, ContextKind::MapLike { binding, node: true }),
            TypeRef::Bool if !is_var => self.child_of(
                parent,
                ContextKind::Boolean {
                    test: Test::Truthy(binding.expr),
                },
            ),
            TypeRef::BoxedBool if !is_var => {
                let guard = self.guard(&binding, parent);
                self.child_of(
                    guard,
                    ContextKind::Boolean {
                        test: Test::Truthy(binding.expr),
                    },
                )
            }
            TypeRef::Optional(inner) => {
                let component = Binding::new(Expr::unwrap(&binding.expr), *inner);
                let optional = self.child_of(parent, ContextKind::Optional { binding });
                self.bind(context_type, component, optional)?
            }
            TypeRef::List(element) | TypeRef::Array(element) => {
                let kind = if matches!(binding.ty, TypeRef::List(_)) { LoopKind::List } else { LoopKind::Array };
                let guard = self.guard(&binding, parent);
                let (scope, depth) = self.scope(guard);
                let index = format!("i{}", depth);
                let component = Binding::new(Expr::index(&binding.expr, &index), *element);
                let loop_node = self.child_of(
                    scope,
                    ContextKind::Loop {
                        source: binding,
                        element: None,
                        index,
                        kind,
                    },
                );
                self.bind(Element, component, loop_node)?
            }
            TypeRef::Iterable(element) if context_type == Section => {
                let guard = self.guard(&binding, parent);
                let (scope, depth) = self.scope(guard);
                let var = format!("item{}", depth);
                let loop_node = self.child_of(
                    scope,
                    ContextKind::Loop {
                        source: binding,
                        element: Some(var.clone()),
                        index: format!("i{}", depth),
                        kind: LoopKind::Iterable,
                    },
                );
                self.bind(Element, Binding::new(Expr::Var(var), *element), loop_node)?
            }
            TypeRef::Map(_) => {
                // empty maps are falsey, as in inverted sections
                let guard = if is_var {
                    parent
                } else {
                    let test = Test::not(Test::Falsey(binding.expr.clone()));
                    self.child_of(parent, ContextKind::Boolean { test })
                };
                self.child_of(guard, ContextKind::MapLike { binding, node: false })
            }
            TypeRef::Named(_) | TypeRef::Object => {
                let guard = if is_var { parent } else { self.guard(&binding, parent) };
                if self.schema.is_enum(&binding.ty) {
                    self.child_of(guard, ContextKind::Enum { binding })
                } else {
                    self.child_of(guard, ContextKind::BoundObject { binding })
                }
            }
            TypeRef::Str if !is_var => {
                let guard = self.guard(&binding, parent);
                self.child_of(guard, ContextKind::NoData { binding })
            }
            _ => self.child_of(parent, ContextKind::NoData { binding }),
        };
        Ok(node)
    }

    fn guard(&mut self, binding: &Binding, parent: NodeId) -> NodeId {
        let expr = binding.expr.clone();
        let test = match binding.ty {
            TypeRef::Object => Test::NotFalse(expr),
            _ => Test::NotNull(expr),
        };
        self.child_of(parent, ContextKind::Boolean { test })
    }

    fn scope(&mut self, parent: NodeId) -> (NodeId, usize) {
        let depth = self.scope_depth(parent) + 1;
        (self.child_of(parent, ContextKind::Variables { depth }), depth)
    }

    fn scope_depth(&self, id: NodeId) -> usize {
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            if let ContextKind::Variables { depth } = self.nodes[n].kind {
                return depth;
            }
            cursor = self.nodes[n].parent;
        }
        0
    }

    /// A fresh variable name for a value bound inside `id`.
    pub(crate) fn variable(&self, id: NodeId, like: &str) -> String {
        let like = like
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect::<String>();
        format!("{}{}", like, self.scope_depth(id) + 1)
    }

    /// Opens a variable scope below `id`.
    pub(crate) fn open_scope(&mut self, id: NodeId) -> NodeId {
        self.scope(id).0
    }

    fn inverted_test(&self, binding: &Binding) -> Result<Test, BindError> {
        let e = binding.expr.clone();
        let test = match &binding.ty {
            ty if ty.is_collection() => Test::Any(vec![Test::Null(e.clone()), Test::Empty(e)]),
            TypeRef::Bool => Test::not(Test::Truthy(e)),
            TypeRef::BoxedBool => Test::Any(vec![Test::Null(e.clone()), Test::not(Test::Truthy(e))]),
            TypeRef::Optional(_) => Test::not(Test::Present(e)),
            TypeRef::Node | TypeRef::Map(_) => Test::Falsey(e),
            TypeRef::Object => Test::not(Test::NotFalse(e)),
            TypeRef::Named(_) | TypeRef::Str => Test::Null(e),
            other => return Err(BindError::Type(format!("can't invert {} value '{}'", other, e))),
        };
        Ok(test)
    }

    /// The binding a variable tag renders, if its type can be formatted.
    pub(crate) fn renderable(&self, id: NodeId, name: &str) -> Result<Binding, BindError> {
        let binding = self
            .current(id)
            .cloned()
            .ok_or_else(|| BindError::Type(format!("'{}' has no value to render", name)))?;
        let allowed = match &binding.ty {
            ty if ty.is_primitive() || ty.is_boolean() => true,
            TypeRef::Str | TypeRef::Object | TypeRef::Node => true,
            TypeRef::Named(type_name) => {
                self.schema.is_enum(&binding.ty)
                    || self.schema.is_formattable(&binding.ty)
                    || self.options.formatter_types.iter().any(|t| t == type_name)
            }
            _ => false,
        };
        if allowed {
            Ok(binding)
        } else {
            Err(BindError::Type(format!(
                "'{}' of type {} is not an allowed type to format",
                name, binding.ty
            )))
        }
    }

    fn not_found(&self, id: NodeId, name: &str) -> BindError {
        let trace = if self.options.debug {
            let trace = self.describe(id);
            debug!(name, %trace, "lookup failed");
            Some(trace)
        } else {
            None
        };
        BindError::NotFound {
            name: name.to_owned(),
            trace,
        }
    }

    /// The context chain from `id` to the root, one context per line.
    pub(crate) fn describe(&self, id: NodeId) -> String {
        let mut result = String::new();
        let mut cursor = Some(id);
        while let Some(n) = cursor {
            let node = &self.nodes[n];
            let _ = match &node.kind {
                ContextKind::Root => writeln!(result, "root"),
                ContextKind::Owned => writeln!(result, "owned"),
                ContextKind::Variables { depth } => writeln!(result, "variables {}", depth),
                ContextKind::Boolean { test } => writeln!(result, "boolean {}", test),
                ContextKind::BoundObject { binding } => writeln!(result, "object {}: {}", binding.expr, binding.ty),
                ContextKind::Enum { binding } => writeln!(result, "enum {}: {}", binding.expr, binding.ty),
                ContextKind::MapLike { binding, .. } => writeln!(result, "map {}: {}", binding.expr, binding.ty),
                ContextKind::Loop { source, index, .. } => {
                    writeln!(result, "loop {}: {} ({})", source.expr, source.ty, index)
                }
                ContextKind::Optional { binding } => writeln!(result, "optional {}: {}", binding.expr, binding.ty),
                ContextKind::Lambda { name } => writeln!(result, "lambda {}", name),
                ContextKind::Inverted { test } => writeln!(result, "inverted {}", test),
                ContextKind::NoData { binding } => writeln!(result, "value {}: {}", binding.expr, binding.ty),
            };
            cursor = node.parent;
        }
        result
    }
}

enum First<'s> {
    Binding(Binding),
    Lambda(&'s LambdaDecl, Binding),
}

fn inaccessible(name: &str, access: AccessViolation) -> BindError {
    BindError::Inaccessible {
        name: name.to_owned(),
        access,
    }
}

fn access_violation(member: &MemberDecl) -> Option<AccessViolation> {
    let private = member.visibility == Visibility::Private;
    match member.kind {
        MemberKind::Method if private => Some(AccessViolation::PrivateMethod),
        MemberKind::Method if member.is_static => Some(AccessViolation::StaticMethod),
        MemberKind::Method if member.throws_checked => Some(AccessViolation::CheckedException),
        MemberKind::Field if private => Some(AccessViolation::PrivateField),
        MemberKind::Field if member.is_static => Some(AccessViolation::StaticField),
        _ => None,
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
