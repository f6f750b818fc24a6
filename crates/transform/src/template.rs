//! Text templates (jinja syntax via minijinja) with named snippets.
//!
//! Snippets are callable from the template as `include("name", ctx)`; the `indent`
//! filter re-indents multi-line values so they can be spliced into YAML blocks:
//!
//! ```text
//! data:
//!   config: |
//!     {{ config | indent(4) }}
//! ```

use std::collections::BTreeMap;

use minijinja::value::Value as JinjaValue;
use minijinja::{Environment, Error, ErrorKind, State, UndefinedBehavior};
use serde::Serialize;

use crate::TemplateError;

/// Name the top-level template is registered under by [`render`].
pub const DEFAULT_TEMPLATE_NAME: &str = "manifest";

/// Indent every non-empty line after the first by `width` spaces.
pub fn indent(value: String, width: usize) -> String {
    let pad = " ".repeat(width);
    let mut out = String::with_capacity(value.len());
    for (i, line) in value.split('\n').enumerate() {
        if i != 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&pad);
            }
        }
        out.push_str(line);
    }
    out
}

fn include(state: &State, name: &str, ctx: Option<JinjaValue>) -> Result<String, Error> {
    let tmpl = state.env().get_template(name).map_err(|e| {
        Error::new(ErrorKind::TemplateNotFound, format!("snippet {:?} is not defined", name)).with_source(e)
    })?;
    tmpl.render(ctx.unwrap_or_else(|| minijinja::context! {}))
}

/// Renders one top-level template against a set of snippets.
pub struct Renderer<'a> {
    name: &'a str,
    snippets: Vec<(&'a str, &'a str)>,
    fail_on_missing: bool,
}

impl<'a> Renderer<'a> {
    pub fn new(name: &'a str) -> Self {
        Self { name, snippets: Vec::new(), fail_on_missing: true }
    }

    /// Strict (error) vs lenient (empty) handling of absent context keys.
    pub fn fail_on_missing(mut self, fail: bool) -> Self {
        self.fail_on_missing = fail;
        self
    }

    pub fn snippet(mut self, name: &'a str, text: &'a str) -> Self {
        self.snippets.push((name, text));
        self
    }

    pub fn snippets(mut self, snippets: &'a BTreeMap<String, String>) -> Self {
        self.snippets.extend(snippets.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self
    }

    fn environment(&self, template: &'a str) -> Result<Environment<'a>, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if self.fail_on_missing {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Chainable
        });
        env.add_filter("indent", indent);
        env.add_function("include", include);
        for &(name, text) in &self.snippets {
            if name == self.name {
                return Err(TemplateError::SnippetCollision(name.to_string()));
            }
            env.add_template(name, text).map_err(|source| TemplateError::Syntax { name: name.to_string(), source })?;
        }
        env.add_template(self.name, template)
            .map_err(|source| TemplateError::Syntax { name: self.name.to_string(), source })?;
        Ok(env)
    }

    pub fn render<S: Serialize>(&self, template: &'a str, ctx: S) -> Result<String, TemplateError> {
        let env = self.environment(template)?;
        let tmpl = env.get_template(self.name)?;
        Ok(tmpl.render(ctx)?)
    }
}

/// Render `template` with `ctx`; `snippets` are available through `include`.
pub fn render<S: Serialize>(
    template: &str,
    ctx: S,
    snippets: &BTreeMap<String, String>,
    fail_on_missing: bool,
) -> Result<String, TemplateError> {
    Renderer::new(DEFAULT_TEMPLATE_NAME)
        .fail_on_missing(fail_on_missing)
        .snippets(snippets)
        .render(template, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn indent_filter_skips_first_and_blank_lines() {
        let out = render("{{ line | indent(2) }}", json!({"line": "this is a line of\ntext"}), &BTreeMap::new(), true).unwrap();
        assert_eq!(out, "this is a line of\n  text");
        assert_eq!(indent("a\n\nb\n".into(), 3), "a\n\n   b\n");
    }

    #[test]
    fn snippets_render_with_given_context() {
        let snippets = BTreeMap::from([("labels".to_string(), "app: {{ name }}\nteam: {{ team }}".to_string())]);
        let tmpl = "metadata:\n  labels:\n    {{ include(\"labels\", {\"name\": name, \"team\": \"infra\"}) | indent(4) }}";
        let out = render(tmpl, json!({"name": "web"}), &snippets, true).unwrap();
        assert_eq!(out, "metadata:\n  labels:\n    app: web\n    team: infra");
    }

    #[test]
    fn missing_keys_follow_strictness() {
        let strict = render("v={{ spec.version }}", json!({"spec": {}}), &BTreeMap::new(), true);
        assert!(matches!(strict, Err(TemplateError::Render(_))));
        let lenient = render("v={{ spec.version }}", json!({"spec": {}}), &BTreeMap::new(), false).unwrap();
        assert_eq!(lenient, "v=");
        let deep = render("v={{ a.b.c }}", json!({}), &BTreeMap::new(), false).unwrap();
        assert_eq!(deep, "v=");
    }

    #[test]
    fn snippet_may_not_shadow_template() {
        let snippets = BTreeMap::from([(DEFAULT_TEMPLATE_NAME.to_string(), "x".to_string())]);
        match render("hi", json!({}), &snippets, true) {
            Err(TemplateError::SnippetCollision(name)) => assert_eq!(name, DEFAULT_TEMPLATE_NAME),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_snippet_is_an_error() {
        let err = render("{{ include(\"nope\") }}", json!({}), &BTreeMap::new(), true).unwrap_err();
        assert!(err.to_string().contains("nope"), "{err}");
    }
}
