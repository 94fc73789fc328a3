use tracing::debug;

use crate::context::Binding;
use crate::error::BindError;
use crate::expr::{Arg, Expr};
use crate::schema::{LambdaDecl, TypeRef, TypeSchema};

/// What a lambda parameter receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    /// The unprocessed section body.
    RawBody,
    /// The enclosing context value.
    CurrentContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnMode {
    /// Written verbatim, unescaped.
    RawString,
    /// Bound as a new context; the body (or the lambda's own template) is
    /// compiled against it.
    Model(TypeRef),
}

/// A lambda section resolved to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lambda {
    pub name: String,
    pub method: String,
    pub target: Expr,
    pub params: Vec<ParamMode>,
    pub returns: ReturnMode,
    pub template: Option<String>,
    context: Option<Expr>,
}

impl Lambda {
    /// Checks the declared signature against the section it is used in.
    pub(crate) fn plan(
        schema: &dyn TypeSchema,
        decl: &LambdaDecl,
        target: Expr,
        context: Option<&Binding>,
    ) -> Result<Lambda, BindError> {
        let name = decl.name();
        let signature = |message: &str| BindError::LambdaSignature {
            lambda: name.to_owned(),
            message: message.to_owned(),
        };
        if decl.params.is_empty() || decl.params.len() > 2 {
            return Err(signature("expected one or two parameters"));
        }
        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let mode = if param.raw {
                if param.ty != TypeRef::Str {
                    return Err(BindError::Type(format!(
                        "raw parameter of lambda '{}' must be a string, not {}",
                        name, param.ty
                    )));
                }
                ParamMode::RawBody
            } else {
                let current = context.ok_or_else(|| {
                    BindError::Type(format!("lambda '{}' has no context to receive", name))
                })?;
                if !schema.is_assignable(&current.ty, &param.ty) {
                    return Err(BindError::Type(format!(
                        "lambda '{}' expects {} but the current context is {}",
                        name, param.ty, current.ty
                    )));
                }
                ParamMode::CurrentContext
            };
            if params.contains(&mode) {
                return Err(signature(match mode {
                    ParamMode::RawBody => "only one raw body parameter is allowed",
                    ParamMode::CurrentContext => "only one context parameter is allowed",
                }));
            }
            params.push(mode);
        }
        let returns = match (&decl.returns, decl.raw_return) {
            (TypeRef::Str, true) => ReturnMode::RawString,
            (other, true) => {
                return Err(BindError::Type(format!(
                    "raw return of lambda '{}' must be a string, not {}",
                    name, other
                )))
            }
            (TypeRef::Named(model), false) if schema.declaration(model).is_some() => {
                ReturnMode::Model(decl.returns.clone())
            }
            (other, false) => {
                return Err(BindError::Type(format!(
                    "unsupported return type of lambda '{}': {}",
                    name, other
                )))
            }
        };
        debug!(lambda = name, ?params, ?returns, "lambda planned");
        Ok(Lambda {
            name: name.to_owned(),
            method: decl.method.clone(),
            target,
            params,
            returns,
            template: decl.template.clone(),
            context: context.map(|binding| binding.expr.clone()),
        })
    }

    pub(crate) fn call(&self, body: &str) -> Expr {
        let args = self
            .params
            .iter()
            .map(|mode| match mode {
                ParamMode::RawBody => Arg::Body(body.to_owned()),
                ParamMode::CurrentContext => Arg::Value(self.context.clone().unwrap_or(Expr::Root)),
            })
            .collect();
        Expr::Call {
            target: Box::new(self.target.clone()),
            method: self.method.clone(),
            lambda: self.name.clone(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamDecl, SchemaRegistry, TypeDecl};
    use pretty_assertions::assert_eq;

    fn decl(params: Vec<ParamDecl>, returns: TypeRef, raw_return: bool) -> LambdaDecl {
        LambdaDecl {
            method: "wrap".to_owned(),
            name: None,
            params,
            returns,
            raw_return,
            template: None,
        }
    }

    fn raw() -> ParamDecl {
        ParamDecl {
            ty: TypeRef::Str,
            raw: true,
        }
    }

    fn context(ty: TypeRef) -> ParamDecl {
        ParamDecl { ty, raw: false }
    }

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema.insert("Page", TypeDecl::default());
        schema.insert("Item", TypeDecl::default());
        schema
    }

    fn page() -> Binding {
        Binding {
            expr: Expr::Root,
            ty: TypeRef::named("Page"),
        }
    }

    #[test]
    fn raw_body_and_context() {
        let schema = schema();
        let lambda = Lambda::plan(
            &schema,
            &decl(vec![raw(), context(TypeRef::named("Page"))], TypeRef::Str, true),
            Expr::Root,
            Some(&page()),
        )
        .unwrap();
        assert_eq!(lambda.params, vec![ParamMode::RawBody, ParamMode::CurrentContext]);
        assert_eq!(lambda.returns, ReturnMode::RawString);
        assert_eq!(lambda.call("{{x}}").to_string(), "data.wrap(\"{{x}}\", data)");
    }

    #[test]
    fn two_raw_parameters_are_rejected() {
        let error = Lambda::plan(
            &schema(),
            &decl(vec![raw(), raw()], TypeRef::Str, true),
            Expr::Root,
            Some(&page()),
        )
        .unwrap_err();
        assert_eq!(
            error,
            BindError::LambdaSignature {
                lambda: "wrap".to_owned(),
                message: "only one raw body parameter is allowed".to_owned()
            }
        );
    }

    #[test]
    fn parameter_count() {
        let error = Lambda::plan(&schema(), &decl(vec![], TypeRef::Str, true), Expr::Root, None)
            .unwrap_err();
        assert!(matches!(error, BindError::LambdaSignature { .. }));
    }

    #[test]
    fn context_type_must_match() {
        let error = Lambda::plan(
            &schema(),
            &decl(vec![context(TypeRef::named("Item"))], TypeRef::Str, true),
            Expr::Root,
            Some(&page()),
        )
        .unwrap_err();
        assert!(matches!(error, BindError::Type(_)));
    }

    #[test]
    fn model_return() {
        let lambda = Lambda::plan(
            &schema(),
            &decl(vec![raw()], TypeRef::named("Item"), false),
            Expr::Root,
            None,
        )
        .unwrap();
        assert_eq!(lambda.returns, ReturnMode::Model(TypeRef::named("Item")));
        let error = Lambda::plan(&schema(), &decl(vec![raw()], TypeRef::Int, true), Expr::Root, None)
            .unwrap_err();
        assert!(matches!(error, BindError::Type(_)));
    }
}
