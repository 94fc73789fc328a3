//! A static Mustache compiler.
//!
//! Templates are compiled against a statically known data model described
//! by a [TypeSchema]. Every variable, section and partial is bound while
//! compiling, so a misspelled name, a value that cannot be rendered or an
//! unbalanced section is a [CompileError] instead of empty output.
//!
//! The result is a [Program], a flat list of [Op]s meant to be turned into
//! code by an emitter. [Program::render] evaluates it directly against a
//! [JsonValue] or [YamlValue] document.
//!
//! Besides the core Mustache modules, templates may use inheritance
//! (`{{<parent}}` and `{{$block}}`), lambdas declared on the model types,
//! enum constants as sections and the `-first`, `-last`, `-index`
//! extensions (or their `@` forms) inside lists.
//!
//! # Samples
//!
//! ## Hello team
//!
//! ```
//! use static_mustache::{CompileRequest, Compiler, SchemaRegistry, TemplateMap, YamlValue};
//!
//! let schema = SchemaRegistry::from_yaml(r#"
//!   Page:
//!     members:
//!       - { name: team, type: "list<Person>" }
//!   Person:
//!     members:
//!       - { name: name, kind: field, type: str }
//!       - { name: getAddress, type: str }
//! "#).unwrap();
//!
//! let text = r#"
//!   {{#team}}
//!   hello, {{address}} {{name}}{{^-last}},{{/-last}}
//!   {{/team}}
//! "#;
//! let templates = TemplateMap::new();
//! let compiler = Compiler::new(&schema, &templates);
//! let program = compiler
//!     .compile(&CompileRequest::inline("team", "Page", text))
//!     .unwrap();
//!
//! let data = serde_yaml::from_str::<YamlValue>(r#"
//!   team:
//!     - name: john
//!       address: little
//!     - name: jane
//!       address: citizen
//! "#).unwrap();
//!
//! assert_eq!(program.render(&data), r#"
//!   hello, little john,
//!   hello, citizen jane
//! "#);
//! ```
//!
//! ## Unknown names
//!
//! ```
//! use static_mustache::{CompileError, CompileRequest, Compiler, SchemaRegistry, TemplateMap};
//!
//! let schema = SchemaRegistry::from_yaml("Page: { members: [ { name: title, type: str } ] }").unwrap();
//! let templates = TemplateMap::new();
//! let compiler = Compiler::new(&schema, &templates);
//!
//! let error = compiler
//!     .compile(&CompileRequest::inline("page", "Page", "<h1>{{titel}}</h1>"))
//!     .unwrap_err();
//! assert!(matches!(error, CompileError::FieldNotFound { .. }));
//! assert_eq!(
//!     error.to_string(),
//!     "page[1:5]: field not found in current context: 'titel' (templates: page)"
//! );
//! ```
mod compiler;
mod config;
mod context;
mod error;
mod eval;
mod expr;
mod inheritance;
mod json;
mod lambda;
mod program;
mod reader;
mod schema;
mod standalone;
mod template;
mod token;
mod yaml;

pub use self::compiler::{Compiler, SECTION_BODY};
pub use self::config::{CompileOptions, CompileRequest, TemplateSource};
pub use self::context::Binding;
pub use self::error::{AccessViolation, BindError, CompileError, CompileResult, SourcePosition};
pub use self::eval::{DataValue, LambdaHost};
pub use self::expr::{Arg, Expr, Test};
pub use self::json::JsonValue;
pub use self::lambda::{Lambda, ParamMode, ReturnMode};
pub use self::program::{LoopKind, Op, Program};
pub use self::schema::{
    LambdaDecl, MemberDecl, MemberKind, ParamDecl, SchemaRegistry, TypeDecl, TypeRef, TypeSchema, Visibility,
};
pub use self::template::{NamedTemplate, TemplateBody, TemplateKind, TemplateMap, TemplateStore};
pub use self::token::{Delimiters, TagKind, Token};
pub use self::yaml::YamlValue;
