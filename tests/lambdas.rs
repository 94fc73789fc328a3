extern crate static_mustache;
use static_mustache::{
    CompileError, CompileRequest, Compiler, DataValue, JsonValue, Op, SchemaRegistry, TemplateMap,
};

use pretty_assertions::assert_eq;
use serde_json::json;

fn schema() -> SchemaRegistry {
    SchemaRegistry::from_yaml(
        r#"
        Page:
          members:
            - { name: name, type: str }
          lambdas:
            - method: bold
              params: [ { type: str, raw: true } ]
              returns: str
              raw_return: true
            - method: greet
              params: [ { type: Page } ]
              returns: str
              raw_return: true
            - method: wrap
              name: box
              params: [ { type: str, raw: true } ]
              returns: Box
            - method: card
              params: [ { type: str, raw: true } ]
              returns: Box
              template: "<div>{{label}}:{{>@section}}</div>"
            - method: broken
              params: []
              returns: str
              raw_return: true
        Box:
          members:
            - { name: label, type: str }
        "#,
    )
    .unwrap()
}

fn host(lambda: &str, args: &[JsonValue]) -> JsonValue {
    match lambda {
        "bold" => JsonValue::String(format!("<b>{}</b>", args[0].render())),
        "greet" => JsonValue::String(format!("hello {}", args[0]["name"].render())),
        "box" => json!({ "label": format!("{} chars", args[0].render().len()) }),
        "card" => json!({ "label": "L" }),
        _ => JsonValue::Null,
    }
}

fn render(template: &str, data: &JsonValue) -> Result<String, CompileError> {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler.compile(&CompileRequest::inline("page", "Page", template))?;
    Ok(program.render_with(data, &host))
}

#[test]
fn raw_body_is_passed_unrendered() {
    assert_eq!(
        render("{{#bold}}Hi {{name}}{{/bold}}!", &json!({ "name": "Ann" })).unwrap(),
        "<b>Hi {{name}}</b>!"
    );
}

#[test]
fn raw_bodies_need_not_be_valid_templates() {
    assert_eq!(render("{{#bold}}{{a..b}}{{/bold}}", &json!({})).unwrap(), "<b>{{a..b}}</b>");
    assert_eq!(render("{{#bold}}{{ }}{{/bold}}", &json!({})).unwrap(), "<b>{{ }}</b>");
    assert_eq!(
        render("{{#bold}}{{=<% %>=}}x{{/bold}}|{{name}}", &json!({ "name": "n" })).unwrap(),
        "<b>{{=<% %>=}}x</b>|n"
    );
}

#[test]
fn raw_results_take_the_partial_indentation() {
    let schema = schema();
    let templates = [("p", "{{#bold}}a{{/bold}} tail\nnext\n")].into_iter().collect::<TemplateMap>();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline("page", "Page", "  {{>p}}\n"))
        .unwrap();
    assert_eq!(program.render_with(&json!({}), &host), "  <b>a</b> tail\n  next\n");
}

#[test]
fn lambda_sections_in_parent_templates() {
    let schema = schema();
    let templates = [("layout", "<{{$a}}A{{/a}}{{#bold}}{{$a}}x{{/bold}}{{$b}}B{{/b}}>")]
        .into_iter()
        .collect::<TemplateMap>();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline(
            "page",
            "Page",
            "{{<layout}}{{$a}}1{{/a}}{{$b}}2{{/b}}{{/layout}}",
        ))
        .unwrap();
    assert_eq!(program.render_with(&json!({}), &host), "<1<b>{{$a}}x</b>2>");
}

#[test]
fn raw_results_are_not_escaped() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline("page", "Page", "{{#bold}}x{{/bold}}"))
        .unwrap();
    assert!(matches!(program.ops.as_slice(), [Op::AppendValue { escaped: false, .. }]));
}

#[test]
fn standalone_lambda_tags() {
    assert_eq!(
        render("{{#bold}}\nx\n{{/bold}}\ny\n", &json!({})).unwrap(),
        "<b>x\n</b>y\n"
    );
}

#[test]
fn current_context_parameter() {
    assert_eq!(
        render("{{#greet}}ignored{{/greet}}", &json!({ "name": "Ann" })).unwrap(),
        "hello Ann"
    );
}

#[test]
fn model_results_are_bound_for_the_body() {
    assert_eq!(
        render("{{#box}}[{{label}}]{{/box}}", &json!({})).unwrap(),
        "[11 chars]"
    );
}

#[test]
fn enclosing_names_stay_visible_in_the_body() {
    assert_eq!(
        render("{{#box}}{{label}}/{{name}}{{/box}}", &json!({ "name": "Ann" })).unwrap(),
        "18 chars/Ann"
    );
}

#[test]
fn lambda_templates_include_the_section() {
    assert_eq!(
        render("{{#card}}{{name}}{{/card}}", &json!({ "name": "Ann" })).unwrap(),
        "<div>L:Ann</div>"
    );
}

#[test]
fn null_models_render_nothing() {
    let schema = schema();
    let templates = TemplateMap::new();
    let compiler = Compiler::new(&schema, &templates);
    let program = compiler
        .compile(&CompileRequest::inline("page", "Page", "[{{#box}}{{label}}{{/box}}]"))
        .unwrap();
    assert_eq!(program.render(&json!({})), "[]");
}

#[test]
fn unclosed_lambda() {
    let error = render("{{#bold}}abc", &json!({})).unwrap_err();
    assert_eq!(
        error.to_string(),
        "page[1:13]: EOF reached before closing tag of lambda \"bold\" (templates: page)"
    );
}

#[test]
fn invalid_signature() {
    let error = render("{{#broken}}x{{/broken}}", &json!({})).unwrap_err();
    assert!(matches!(error, CompileError::LambdaSignature { ref lambda, .. } if lambda == "broken"));
}

#[test]
fn lambdas_are_not_variables() {
    let error = render("{{bold}}", &json!({})).unwrap_err();
    assert!(matches!(error, CompileError::FieldNotFound { ref name, .. } if name == "bold"));
}
