use std::fmt;

/// A value expression bound at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// The root model.
    Root,
    /// A variable introduced by a loop or a lambda result.
    Var(String),
    /// A member access. `member` is the declared member (`getName`), `key`
    /// the name it was requested by (`name`).
    Member {
        target: Box<Expr>,
        member: String,
        key: String,
        call: bool,
    },
    /// Keyed lookup in a map or node.
    Key { target: Box<Expr>, key: String },
    /// Content of a present optional.
    Unwrap(Box<Expr>),
    /// Element of a list or array at the loop index.
    Index { target: Box<Expr>, index: String },
    First { index: String },
    Last { index: String },
    Position { index: String, one_based: bool },
    /// `target == Enum.CONSTANT`.
    EnumIs { target: Box<Expr>, constant: String },
    /// A lambda invocation.
    Call {
        target: Box<Expr>,
        method: String,
        lambda: String,
        args: Vec<Arg>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Raw section body.
    Body(String),
    Value(Expr),
}

impl Expr {
    pub(crate) fn member(target: &Expr, member: &str, key: &str, call: bool) -> Expr {
        Expr::Member {
            target: Box::new(target.clone()),
            member: member.to_owned(),
            key: key.to_owned(),
            call,
        }
    }

    pub(crate) fn key(target: &Expr, key: &str) -> Expr {
        Expr::Key {
            target: Box::new(target.clone()),
            key: key.to_owned(),
        }
    }

    pub(crate) fn unwrap(target: &Expr) -> Expr {
        Expr::Unwrap(Box::new(target.clone()))
    }

    pub(crate) fn index(target: &Expr, index: &str) -> Expr {
        Expr::Index {
            target: Box::new(target.clone()),
            index: index.to_owned(),
        }
    }
}

/// A condition guarding a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    /// The boolean value is true.
    Truthy(Expr),
    Null(Expr),
    NotNull(Expr),
    /// Not null and not an explicit `false`.
    NotFalse(Expr),
    Present(Expr),
    /// A collection, map or node with no elements.
    Empty(Expr),
    /// Node falsiness: null, false, or empty.
    Falsey(Expr),
    Not(Box<Test>),
    /// Short-circuit disjunction, left to right.
    Any(Vec<Test>),
    Const(bool),
}

impl Test {
    pub(crate) fn not(test: Test) -> Test {
        match test {
            Test::Not(inner) => *inner,
            Test::Const(value) => Test::Const(!value),
            Test::Null(e) => Test::NotNull(e),
            Test::NotNull(e) => Test::Null(e),
            other => Test::Not(Box::new(other)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Root => f.write_str("data"),
            Expr::Var(name) => f.write_str(name),
            Expr::Member { target, member, call, .. } => {
                write!(f, "{}.{}{}", target, member, if *call { "()" } else { "" })
            }
            Expr::Key { target, key } => write!(f, "{}[{:?}]", target, key),
            Expr::Unwrap(target) => write!(f, "{}.get()", target),
            Expr::Index { target, index } => write!(f, "{}[{}]", target, index),
            Expr::First { index } => write!(f, "({} == 0)", index),
            Expr::Last { index } => write!(f, "last({})", index),
            Expr::Position { index, one_based } => {
                if *one_based {
                    write!(f, "({} + 1)", index)
                } else {
                    f.write_str(index)
                }
            }
            Expr::EnumIs { target, constant } => write!(f, "({} == {})", target, constant),
            Expr::Call { target, method, args, .. } => {
                write!(f, "{}.{}(", target, method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match arg {
                        Arg::Body(body) => write!(f, "{:?}", body)?,
                        Arg::Value(expr) => write!(f, "{}", expr)?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Test {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Test::Truthy(e) => write!(f, "{}", e),
            Test::Null(e) => write!(f, "{} == null", e),
            Test::NotNull(e) => write!(f, "{} != null", e),
            Test::NotFalse(e) => write!(f, "{} != null && {} != false", e, e),
            Test::Present(e) => write!(f, "{}.isPresent()", e),
            Test::Empty(e) => write!(f, "isEmpty({})", e),
            Test::Falsey(e) => write!(f, "isFalsey({})", e),
            Test::Not(t) => write!(f, "!({})", t),
            Test::Any(tests) => {
                let parts = tests.iter().map(|t| format!("({})", t)).collect::<Vec<_>>();
                f.write_str(&parts.join(" || "))
            }
            Test::Const(value) => write!(f, "{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_reads_like_code() {
        let person = Expr::member(&Expr::Root, "getPerson", "person", true);
        let name = Expr::member(&person, "name", "name", false);
        assert_eq!(name.to_string(), "data.getPerson().name");
        let test = Test::Any(vec![Test::Null(person.clone()), Test::not(Test::Truthy(name))]);
        assert_eq!(test.to_string(), "(data.getPerson() == null) || (!(data.getPerson().name))");
    }

    #[test]
    fn double_negation_collapses() {
        let t = Test::Truthy(Expr::Var("flag".to_owned()));
        assert_eq!(Test::not(Test::not(t.clone())), t);
        assert_eq!(Test::not(Test::Const(false)), Test::Const(true));
    }
}
