extern crate static_mustache;
use static_mustache::{
    CompileError, CompileOptions, CompileRequest, Compiler, Op, SchemaRegistry, TemplateMap,
};

use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

fn schema() -> SchemaRegistry {
    SchemaRegistry::from_yaml(
        r#"
        Page:
          members:
            - { name: title, type: str }
            - { name: rows, type: "list<Row>" }
        Row:
          members:
            - { name: cells, type: "list<str>" }
        "#,
    )
    .unwrap()
}

fn template_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("static-mustache-{}-{}", name, std::process::id()));
    fs::create_dir_all(dir.join("templates")).unwrap();
    dir
}

#[test]
fn compiling_twice_gives_the_same_program() {
    let schema = schema();
    let templates = [("cell", "<td>{{.}}</td>")].into_iter().collect::<TemplateMap>();
    let compiler = Compiler::new(&schema, &templates);
    let request = CompileRequest::inline(
        "table",
        "Page",
        "<h1>{{title}}</h1>\n{{#rows}}\n<tr>{{#cells}}{{>cell}}{{/cells}}</tr>\n{{/rows}}\n",
    );
    let first = compiler.compile(&request).unwrap();
    let second = compiler.compile(&request).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.render(&json!({ "title": "T", "rows": [ { "cells": ["a", "b"] }, { "cells": [] } ] })),
        "<h1>T</h1>\n<tr><td>a</td><td>b</td></tr>\n<tr></tr>\n"
    );
}

#[test]
fn nested_loops_get_their_own_index() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline("t", "Page", "{{#rows}}{{#cells}}{{.}}{{/cells}}{{/rows}}"))
        .unwrap();
    assert_eq!(
        program.listing(),
        concat!(
            "if data.rows() != null {\n",
            "  loop List data.rows() (i1) {\n",
            "    if data.rows()[i1].cells() != null {\n",
            "      loop List data.rows()[i1].cells() (i2) {\n",
            "        escaped data.rows()[i1].cells()[i2]\n",
            "      }\n",
            "    }\n",
            "  }\n",
            "}\n",
        )
    );
}

#[test]
fn partial_ops_are_balanced() {
    let schema = schema();
    let templates = [("head", "<h1>{{title}}</h1>")].into_iter().collect::<TemplateMap>();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline("t", "Page", "{{>head}}{{>head}}"))
        .unwrap();
    let opened = program.ops.iter().filter(|op| matches!(op, Op::InvokePartial(_))).count();
    let closed = program.ops.iter().filter(|op| matches!(op, Op::EndPartial)).count();
    assert_eq!((opened, closed), (2, 2));
    assert_eq!(program.name, "t");
    assert_eq!(program.model, "Page");
}

#[test]
fn resources_resolve_through_the_options() {
    let dir = template_dir("resources");
    fs::write(dir.join("templates/page.mustache"), "{{>head}}|{{title}}").unwrap();
    fs::write(dir.join("templates/head.mustache"), "<h1>").unwrap();
    let options = CompileOptions::from_yaml("path_prefix: templates/\npath_suffix: .mustache\n").unwrap();

    let schema = schema();
    let templates = TemplateMap::with_root(&dir);
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::resource("page", "Page").with_options(options))
        .unwrap();
    assert_eq!(program.render(&json!({ "title": "x" })), "<h1>|x");
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_resource() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let options = CompileOptions {
        path_prefix: "/nonexistent/".to_owned(),
        ..CompileOptions::default()
    };
    let error = compiler
        .compile(&CompileRequest::resource("page", "Page").with_options(options))
        .unwrap_err();
    assert!(matches!(error, CompileError::Io { ref path, .. } if path == &PathBuf::from("/nonexistent/page")));
}

#[test]
fn unsupported_charset() {
    let dir = template_dir("charset");
    fs::write(dir.join("templates/page"), "x").unwrap();
    let schema = schema();
    let templates = TemplateMap::with_root(&dir);
    let compiler = Compiler::new(&schema, &templates);
    let options = CompileOptions {
        path_prefix: "templates/".to_owned(),
        charset: "ISO-8859-1".to_owned(),
        ..CompileOptions::default()
    };
    let error = compiler
        .compile(&CompileRequest::resource("page", "Page").with_options(options))
        .unwrap_err();
    assert!(error.to_string().contains("unsupported charset: ISO-8859-1"));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn lexer_errors_have_positions() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let error = compiler
        .compile(&CompileRequest::inline("t", "Page", "ok\n  {{title"))
        .unwrap_err();
    assert_eq!(error.to_string(), "t[2:3]: missing close delimiter (templates: t)");
    let position = error.position().unwrap();
    assert_eq!((position.row, position.line.as_str()), (2, "  {{title"));
}

#[test]
fn debug_mode_records_the_lookup() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let options = CompileOptions {
        debug: true,
        ..CompileOptions::default()
    };
    let error = compiler
        .compile(&CompileRequest::inline("t", "Page", "{{#rows}}{{titel}}{{/rows}}").with_options(options))
        .unwrap_err();
    match error {
        CompileError::FieldNotFound { trace: Some(trace), .. } => {
            assert!(trace.starts_with("owned\nobject data.rows()[i1]: Row\nloop data.rows(): list<Row> (i1)\n"));
            assert!(trace.ends_with("object data: Page\nroot\n"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn requests_from_configuration() {
    let request: CompileRequest = serde_yaml::from_str(
        r#"
        name: page
        model: Page
        source: { inline: "[{{title}}]" }
        options: { strict_broken_chain: true }
        "#,
    )
    .unwrap();
    assert!(request.options.strict_broken_chain);
    let schema = schema();
    let templates = TemplateMap::new();
    let program = Compiler::new(&schema, &templates).compile(&request).unwrap();
    assert_eq!(program.render(&json!({ "title": "x" })), "[x]");
}
