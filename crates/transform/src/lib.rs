//! Kdecl transformation pipeline: sectioned text, JSON stream rewriting, JSON tree transforms and templates.

#![forbid(unsafe_code)]

mod sections;
mod stream;
mod template;
mod tree;

pub use sections::split_sections;
pub use stream::{rewrite_json, to_indented_string, JsonStreamWriter, JsonToken, JsonTokenizer, WriterError};
pub use template::{indent, render, Renderer, DEFAULT_TEMPLATE_NAME};
pub use tree::{sort_slice, Transformer};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("transform at {path:?} failed: {source}")]
    Callback {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("error encoding value: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("snippet {0:?} has the same name as the template")]
    SnippetCollision(String),
    #[error("template {name:?} does not parse: {source}")]
    Syntax {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("template render error: {0}")]
    Render(#[from] minijinja::Error),
}
