use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Shape of a value as seen by the compiler.
///
/// Written in schema files as `str`, `list<Person>`, `optional<map<int>>`...
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    Bool,
    /// Nullable boolean.
    BoxedBool,
    Int,
    Float,
    Char,
    Str,
    /// Any value, nullable.
    Object,
    /// A dynamic tree node: keyed children, iterable in sections.
    Node,
    Optional(Box<TypeRef>),
    Iterable(Box<TypeRef>),
    List(Box<TypeRef>),
    Array(Box<TypeRef>),
    /// String-keyed map.
    Map(Box<TypeRef>),
    Named(String),
}

impl TypeRef {
    pub fn named(name: &str) -> Self {
        TypeRef::Named(name.to_owned())
    }

    pub fn list(element: TypeRef) -> Self {
        TypeRef::List(Box::new(element))
    }

    pub fn optional(element: TypeRef) -> Self {
        TypeRef::Optional(Box::new(element))
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, TypeRef::Iterable(_) | TypeRef::List(_) | TypeRef::Array(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, TypeRef::Bool | TypeRef::BoxedBool)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeRef::Bool | TypeRef::Int | TypeRef::Float | TypeRef::Char)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::BoxedBool => f.write_str("Boolean"),
            TypeRef::Int => f.write_str("int"),
            TypeRef::Float => f.write_str("float"),
            TypeRef::Char => f.write_str("char"),
            TypeRef::Str => f.write_str("str"),
            TypeRef::Object => f.write_str("object"),
            TypeRef::Node => f.write_str("node"),
            TypeRef::Optional(t) => write!(f, "optional<{}>", t),
            TypeRef::Iterable(t) => write!(f, "iterable<{}>", t),
            TypeRef::List(t) => write!(f, "list<{}>", t),
            TypeRef::Array(t) => write!(f, "array<{}>", t),
            TypeRef::Map(t) => write!(f, "map<{}>", t),
            TypeRef::Named(name) => f.write_str(name),
        }
    }
}

impl FromStr for TypeRef {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if let Some((outer, rest)) = text.split_once('<') {
            let inner = rest
                .strip_suffix('>')
                .ok_or_else(|| format!("unbalanced type: {}", text))?;
            let element = Box::new(inner.parse::<TypeRef>()?);
            return match outer.trim() {
                "optional" => Ok(TypeRef::Optional(element)),
                "iterable" => Ok(TypeRef::Iterable(element)),
                "list" => Ok(TypeRef::List(element)),
                "array" => Ok(TypeRef::Array(element)),
                "map" => Ok(TypeRef::Map(element)),
                other => Err(format!("unknown generic type: {}", other)),
            };
        }
        let ty = match text {
            "bool" | "boolean" => TypeRef::Bool,
            "Boolean" => TypeRef::BoxedBool,
            "int" | "long" => TypeRef::Int,
            "float" | "double" => TypeRef::Float,
            "char" => TypeRef::Char,
            "str" | "string" | "String" => TypeRef::Str,
            "object" | "Object" => TypeRef::Object,
            "node" => TypeRef::Node,
            "" => return Err("empty type".to_owned()),
            name if name.contains(|c: char| c.is_whitespace() || c == '>') => {
                return Err(format!("invalid type name: {}", name))
            }
            name => TypeRef::Named(name.to_owned()),
        };
        Ok(ty)
    }
}

impl TryFrom<String> for TypeRef {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<TypeRef> for String {
    fn from(ty: TypeRef) -> Self {
        ty.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    #[default]
    Method,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

/// An accessible (or not) member of a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDecl {
    pub name: String,
    #[serde(default)]
    pub kind: MemberKind,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Number of parameters, methods only.
    #[serde(default)]
    pub params: usize,
    #[serde(default)]
    pub throws_checked: bool,
}

impl MemberDecl {
    pub fn method(name: &str, ty: TypeRef) -> Self {
        MemberDecl {
            name: name.to_owned(),
            kind: MemberKind::Method,
            ty,
            visibility: Visibility::Public,
            is_static: false,
            params: 0,
            throws_checked: false,
        }
    }

    pub fn field(name: &str, ty: TypeRef) -> Self {
        MemberDecl {
            kind: MemberKind::Field,
            ..MemberDecl::method(name, ty)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub raw: bool,
}

/// A method usable as a lambda section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaDecl {
    pub method: String,
    /// Section name, defaults to the method name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    pub returns: TypeRef,
    #[serde(default)]
    pub raw_return: bool,
    /// Template rendered against a returned model; `{{>@section}}` inside it
    /// refers to the section body.
    #[serde(default)]
    pub template: Option<String>,
}

impl LambdaDecl {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDecl {
    #[serde(default)]
    pub members: Vec<MemberDecl>,
    /// Enum constant names; non-empty for enum types.
    #[serde(default)]
    pub constants: Vec<String>,
    #[serde(default)]
    pub lambdas: Vec<LambdaDecl>,
    #[serde(default)]
    pub supertypes: Vec<String>,
    /// Renderable through a formatter.
    #[serde(default)]
    pub formattable: bool,
}

/// Type introspection the compiler binds names against.
pub trait TypeSchema {
    fn declaration(&self, name: &str) -> Option<&TypeDecl>;

    /// Own members first, then inherited ones, in declaration order.
    fn members(&self, ty: &TypeRef) -> Vec<&MemberDecl> {
        let mut members = Vec::new();
        if let TypeRef::Named(name) = ty {
            let mut pending = vec![name.as_str()];
            let mut seen = Vec::new();
            while let Some(current) = pending.pop() {
                if seen.contains(&current) {
                    continue;
                }
                seen.push(current);
                if let Some(decl) = self.declaration(current) {
                    members.extend(decl.members.iter());
                    pending.extend(decl.supertypes.iter().rev().map(String::as_str));
                }
            }
        }
        members
    }

    fn enum_constants(&self, ty: &TypeRef) -> &[String] {
        match ty {
            TypeRef::Named(name) => self.declaration(name).map(|d| d.constants.as_slice()).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn lambdas(&self, ty: &TypeRef) -> &[LambdaDecl] {
        match ty {
            TypeRef::Named(name) => self.declaration(name).map(|d| d.lambdas.as_slice()).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn is_enum(&self, ty: &TypeRef) -> bool {
        !self.enum_constants(ty).is_empty()
    }

    fn is_formattable(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Named(name) => self.declaration(name).is_some_and(|d| d.formattable),
            _ => false,
        }
    }

    fn is_assignable(&self, from: &TypeRef, to: &TypeRef) -> bool {
        if from == to || *to == TypeRef::Object {
            return true;
        }
        match (from, to) {
            (TypeRef::Bool, TypeRef::BoxedBool) | (TypeRef::BoxedBool, TypeRef::Bool) => true,
            (TypeRef::Named(from), TypeRef::Named(_)) => self
                .declaration(from)
                .map(|d| d.supertypes.iter().any(|s| self.is_assignable(&TypeRef::named(s), to)))
                .unwrap_or(false),
            (TypeRef::List(from) | TypeRef::Array(from), TypeRef::Iterable(to)) => self.is_assignable(from, to),
            _ => false,
        }
    }
}

/// A schema held in memory, usually loaded from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeDecl>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    pub fn insert(&mut self, name: &str, decl: TypeDecl) -> &mut Self {
        self.types.insert(name.to_owned(), decl);
        self
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl TypeSchema for SchemaRegistry {
    fn declaration(&self, name: &str) -> Option<&TypeDecl> {
        self.types.get(name)
    }
}
