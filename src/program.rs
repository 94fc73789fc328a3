use std::fmt;

use crate::expr::{Expr, Test};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Iterable,
    List,
    Array,
    /// A node section: arrays iterate, other truthy values render once.
    Node,
}

/// One step of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    AppendLiteral(String),
    AppendValue {
        /// The tag name the value was requested by.
        path: String,
        expr: Expr,
        escaped: bool,
    },
    OpenLoop {
        source: Expr,
        element: Option<String>,
        index: String,
        kind: LoopKind,
    },
    CloseLoop,
    OpenConditional(Test),
    CloseConditional,
    /// Binds the result of a lambda for the enclosed ops.
    Bind { var: String, expr: Expr },
    Unbind,
    InvokePartial(String),
    EndPartial,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::AppendLiteral(text) => write!(f, "literal {:?}", text),
            Op::AppendValue { expr, escaped, .. } => {
                write!(f, "{} {}", if *escaped { "escaped" } else { "unescaped" }, expr)
            }
            Op::OpenLoop { source, element, index, kind } => {
                write!(f, "loop {:?} {} ({}", kind, source, index)?;
                if let Some(element) = element {
                    write!(f, ", {}", element)?;
                }
                f.write_str(") {")
            }
            Op::CloseLoop | Op::CloseConditional | Op::Unbind => f.write_str("}"),
            Op::OpenConditional(test) => write!(f, "if {} {{", test),
            Op::Bind { var, expr } => write!(f, "let {} = {} {{", var, expr),
            Op::InvokePartial(name) => write!(f, "partial {:?} {{", name),
            Op::EndPartial => f.write_str("} partial"),
        }
    }
}

/// The output of compiling one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Name of the compiled template.
    pub name: String,
    /// Root model type.
    pub model: String,
    pub charset: String,
    pub ops: Vec<Op>,
}

impl Program {
    /// The ops as indented pseudo-code, one per line.
    pub fn listing(&self) -> String {
        let mut result = String::new();
        let mut depth = 0usize;
        for op in &self.ops {
            if matches!(op, Op::CloseLoop | Op::CloseConditional | Op::Unbind | Op::EndPartial) {
                depth = depth.saturating_sub(1);
            }
            result.push_str(&"  ".repeat(depth));
            result.push_str(&op.to_string());
            result.push('\n');
            if matches!(
                op,
                Op::OpenLoop { .. } | Op::OpenConditional(_) | Op::Bind { .. } | Op::InvokePartial(_)
            ) {
                depth += 1;
            }
        }
        result
    }
}

/// Collects ops, merging adjacent literals.
#[derive(Debug, Default)]
pub(crate) struct ProgramBuilder {
    ops: Vec<Op>,
}

impl ProgramBuilder {
    pub(crate) fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Op::AppendLiteral(last)) = self.ops.last_mut() {
            last.push_str(text);
        } else {
            self.ops.push(Op::AppendLiteral(text.to_owned()));
        }
    }

    pub(crate) fn push(&mut self, op: Op) {
        match op {
            Op::AppendLiteral(text) => self.literal(&text),
            op => self.ops.push(op),
        }
    }

    pub(crate) fn extend(&mut self, ops: impl IntoIterator<Item = Op>) {
        for op in ops {
            self.push(op);
        }
    }

    pub(crate) fn finish(self) -> Vec<Op> {
        self.ops
    }
}
