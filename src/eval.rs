//! Reference evaluator for compiled programs.
//!
//! Programs are normally turned into code by an emitter; rendering them
//! directly against a document value makes compiled templates testable.

use crate::expr::{Arg, Expr, Test};
use crate::program::{LoopKind, Op, Program};

/// A document value a program can be rendered against.
pub trait DataValue: Clone {
    fn null() -> Self;
    fn from_bool(value: bool) -> Self;
    fn from_index(value: usize) -> Self;
    fn from_text(text: &str) -> Self;

    fn child(&self, key: &str) -> Option<Self>;
    /// Elements, when the value is a sequence.
    fn elements(&self) -> Option<Vec<Self>>;
    fn is_null(&self) -> bool;
    fn as_bool(&self) -> Option<bool>;
    fn as_text(&self) -> Option<&str>;
    /// Sequences and maps without entries, and empty strings.
    fn is_empty(&self) -> bool;
    /// The text written for the value by `{{name}}`.
    fn render(&self) -> String;
}

/// Supplies the results of lambda calls.
pub trait LambdaHost<V> {
    fn call(&self, lambda: &str, args: &[V]) -> V;
}

impl<V, F> LambdaHost<V> for F
where
    F: Fn(&str, &[V]) -> V,
{
    fn call(&self, lambda: &str, args: &[V]) -> V {
        self(lambda, args)
    }
}

struct NoLambdas;

impl<V: DataValue> LambdaHost<V> for NoLambdas {
    fn call(&self, _lambda: &str, _args: &[V]) -> V {
        V::null()
    }
}

impl Program {
    pub fn render<V: DataValue>(&self, data: &V) -> String {
        self.render_with(data, &NoLambdas)
    }

    pub fn render_with<V: DataValue>(&self, data: &V, lambdas: &dyn LambdaHost<V>) -> String {
        let closing = matching_close(&self.ops);
        let mut state = State {
            ops: &self.ops,
            closing: &closing,
            root: data,
            lambdas,
            vars: Vec::new(),
            loops: Vec::new(),
            output: String::new(),
        };
        state.exec(0, self.ops.len());
        state.output
    }
}

// index of the closing op for each opening op
fn matching_close(ops: &[Op]) -> Vec<usize> {
    let mut closing = vec![0; ops.len()];
    let mut open = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::OpenLoop { .. } | Op::OpenConditional(_) | Op::Bind { .. } | Op::InvokePartial(_) => open.push(i),
            Op::CloseLoop | Op::CloseConditional | Op::Unbind | Op::EndPartial => {
                if let Some(start) = open.pop() {
                    closing[start] = i;
                }
            }
            _ => {}
        }
    }
    closing
}

struct LoopState {
    index_name: String,
    index: usize,
    len: usize,
}

struct State<'p, V> {
    ops: &'p [Op],
    closing: &'p [usize],
    root: &'p V,
    lambdas: &'p dyn LambdaHost<V>,
    vars: Vec<(String, V)>,
    loops: Vec<LoopState>,
    output: String,
}

impl<V: DataValue> State<'_, V> {
    fn exec(&mut self, start: usize, end: usize) {
        let mut pc = start;
        while pc < end {
            let ops = self.ops;
            match &ops[pc] {
                Op::AppendLiteral(text) => self.output.push_str(text),
                Op::AppendValue { expr, escaped, .. } => {
                    let text = self.eval(expr).render();
                    if *escaped {
                        self.output.push_str(&html_escape(&text));
                    } else {
                        self.output.push_str(&text);
                    }
                }
                Op::OpenConditional(test) => {
                    let close = self.closing[pc];
                    if self.test(test) {
                        self.exec(pc + 1, close);
                    }
                    pc = close;
                }
                Op::OpenLoop {
                    source,
                    element,
                    index,
                    kind,
                } => {
                    let close = self.closing[pc];
                    let value = self.eval(source);
                    let items = match (kind, value.elements()) {
                        (_, Some(items)) => items,
                        (LoopKind::Node, None) if !falsey(&value) => vec![value],
                        _ => Vec::new(),
                    };
                    let len = items.len();
                    for (i, item) in items.into_iter().enumerate() {
                        self.loops.push(LoopState {
                            index_name: index.clone(),
                            index: i,
                            len,
                        });
                        if let Some(element) = element {
                            self.vars.push((element.clone(), item));
                        }
                        self.exec(pc + 1, close);
                        if element.is_some() {
                            self.vars.pop();
                        }
                        self.loops.pop();
                    }
                    pc = close;
                }
                Op::Bind { var, expr } => {
                    let close = self.closing[pc];
                    let value = self.eval(expr);
                    self.vars.push((var.clone(), value));
                    self.exec(pc + 1, close);
                    self.vars.pop();
                    pc = close;
                }
                Op::InvokePartial(_)
                | Op::EndPartial
                | Op::CloseLoop
                | Op::CloseConditional
                | Op::Unbind => {}
            }
            pc += 1;
        }
    }

    fn position(&self, name: &str) -> Option<&LoopState> {
        self.loops.iter().rev().find(|l| l.index_name == name)
    }

    fn eval(&self, expr: &Expr) -> V {
        match expr {
            Expr::Root => self.root.clone(),
            Expr::Var(name) => self
                .vars
                .iter()
                .rev()
                .find(|(var, _)| var == name)
                .map_or_else(V::null, |(_, value)| value.clone()),
            Expr::Member { target, key, .. } | Expr::Key { target, key } => {
                self.eval(target).child(key).unwrap_or_else(V::null)
            }
            Expr::Unwrap(target) => self.eval(target),
            Expr::Index { target, index } => {
                let position = self.position(index).map_or(0, |l| l.index);
                self.eval(target)
                    .elements()
                    .and_then(|items| items.into_iter().nth(position))
                    .unwrap_or_else(V::null)
            }
            Expr::First { index } => V::from_bool(self.position(index).is_some_and(|l| l.index == 0)),
            Expr::Last { index } => V::from_bool(self.position(index).is_some_and(|l| l.index + 1 == l.len)),
            Expr::Position { index, one_based } => {
                let position = self.position(index).map_or(0, |l| l.index);
                V::from_index(if *one_based { position + 1 } else { position })
            }
            Expr::EnumIs { target, constant } => {
                V::from_bool(self.eval(target).as_text() == Some(constant.as_str()))
            }
            Expr::Call { lambda, args, .. } => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Body(body) => V::from_text(body),
                        Arg::Value(expr) => self.eval(expr),
                    })
                    .collect::<Vec<_>>();
                self.lambdas.call(lambda, &args)
            }
        }
    }

    fn test(&self, test: &Test) -> bool {
        match test {
            Test::Truthy(e) => self.eval(e).as_bool() == Some(true),
            Test::Null(e) => self.eval(e).is_null(),
            Test::NotNull(e) => !self.eval(e).is_null(),
            Test::NotFalse(e) => {
                let value = self.eval(e);
                !value.is_null() && value.as_bool() != Some(false)
            }
            Test::Present(e) => !self.eval(e).is_null(),
            Test::Empty(e) => self.eval(e).is_empty(),
            Test::Falsey(e) => falsey(&self.eval(e)),
            Test::Not(inner) => !self.test(inner),
            Test::Any(tests) => tests.iter().any(|t| self.test(t)),
            Test::Const(value) => *value,
        }
    }
}

fn falsey<V: DataValue>(value: &V) -> bool {
    value.is_null() || value.as_bool() == Some(false) || value.is_empty()
}

pub(crate) fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
