//! Token-level JSON re-serializer.
//!
//! `JsonStreamWriter` consumes the token stream of a document (as produced by
//! [`JsonTokenizer`]) and writes indented JSON, reporting the dotted field path of
//! the current position so callers can rewrite values in flight.

use std::fmt;
use std::io;

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum JsonToken {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

impl fmt::Display for JsonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonToken::BeginObject => f.write_str("{"),
            JsonToken::EndObject => f.write_str("}"),
            JsonToken::BeginArray => f.write_str("["),
            JsonToken::EndArray => f.write_str("]"),
            JsonToken::String(s) => write!(f, "{:?}", s),
            JsonToken::Number(n) => write!(f, "{}", n),
            JsonToken::Bool(b) => write!(f, "{}", b),
            JsonToken::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("unexpected token {token} in state {state:?}")]
    UnexpectedToken { state: String, token: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

const OBJECT: u8 = b'{';
const ARRAY: u8 = b'[';
const FIELD: u8 = b'F';

const INDENT: &str = "  ";

pub struct JsonStreamWriter<W: io::Write> {
    out: W,
    prefix: String,
    state: Vec<u8>,
    path: Vec<String>,
    deferred: Option<&'static str>,
}

impl<W: io::Write> JsonStreamWriter<W> {
    /// `prefix` is written before every line, ahead of the nesting indent.
    pub fn new(out: W, prefix: impl Into<String>) -> Self {
        Self { out, prefix: prefix.into(), state: Vec::new(), path: Vec::new(), deferred: None }
    }

    /// Field names from the root to the current position, joined by `.`. Array levels add nothing.
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// True when the next token must be a field name.
    pub fn expects_field_name(&self) -> bool {
        self.state.last() == Some(&OBJECT)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn state_label(&self) -> String {
        String::from_utf8_lossy(&self.state).into_owned()
    }

    fn unexpected(&self, token: &JsonToken) -> WriterError {
        WriterError::UnexpectedToken { state: self.state_label(), token: token.to_string() }
    }

    fn indent(&self) -> String {
        let depth = self.state.iter().filter(|s| **s != FIELD).count();
        let mut s = self.prefix.clone();
        for _ in 0..depth {
            s.push_str(INDENT);
        }
        s
    }

    fn write(&mut self, chunk: &str) -> Result<(), WriterError> {
        if let Some(d) = self.deferred.take() {
            self.out.write_all(d.as_bytes())?;
        }
        self.out.write_all(chunk.as_bytes())?;
        Ok(())
    }

    fn scalar(token: &JsonToken) -> Result<String, serde_json::Error> {
        Ok(match token {
            JsonToken::String(s) => serde_json::to_string(s)?,
            JsonToken::Number(n) => n.to_string(),
            JsonToken::Bool(b) => b.to_string(),
            _ => "null".to_string(),
        })
    }

    pub fn write_token(&mut self, token: &JsonToken) -> Result<(), WriterError> {
        let top = self.state.last().copied();
        match token {
            JsonToken::BeginObject | JsonToken::BeginArray => {
                let (open, marker) = if *token == JsonToken::BeginObject { ("{", OBJECT) } else { ("[", ARRAY) };
                match top {
                    Some(OBJECT) => return Err(self.unexpected(token)),
                    Some(FIELD) => self.write(open)?,
                    _ => {
                        let line = format!("{}{}", self.indent(), open);
                        self.write(&line)?;
                    }
                }
                self.state.push(marker);
                self.deferred = Some("\n");
            }
            JsonToken::EndObject | JsonToken::EndArray => {
                let (close, marker) = if *token == JsonToken::EndObject { ("}", OBJECT) } else { ("]", ARRAY) };
                if top != Some(marker) {
                    return Err(self.unexpected(token));
                }
                self.state.pop();
                if self.deferred == Some(",\n") {
                    self.deferred = Some("\n");
                }
                let line = format!("{}{}", self.indent(), close);
                self.write(&line)?;
                if self.state.last() == Some(&FIELD) {
                    self.state.pop();
                    self.path.pop();
                }
                if !self.state.is_empty() {
                    self.deferred = Some(",\n");
                }
            }
            JsonToken::String(name) if top == Some(OBJECT) => {
                let quoted = serde_json::to_string(name).map_err(io::Error::from)?;
                let line = format!("{}{}: ", self.indent(), quoted);
                self.path.push(name.clone());
                self.state.push(FIELD);
                self.write(&line)?;
            }
            _ => {
                let text = Self::scalar(token).map_err(io::Error::from)?;
                match top {
                    Some(FIELD) => {
                        self.write(&text)?;
                        self.state.pop();
                        self.path.pop();
                        self.deferred = Some(",\n");
                    }
                    Some(ARRAY) => {
                        let line = format!("{}{}", self.indent(), text);
                        self.write(&line)?;
                        self.deferred = Some(",\n");
                    }
                    None => {
                        let line = format!("{}{}", self.indent(), text);
                        self.write(&line)?;
                    }
                    _ => return Err(self.unexpected(token)),
                }
            }
        }
        Ok(())
    }
}

enum Frame<'a> {
    Object(serde_json::map::Iter<'a>),
    Array(std::slice::Iter<'a, Value>),
}

/// Produces the token stream of a `serde_json::Value`, depth-first in document order.
pub struct JsonTokenizer<'a> {
    stack: Vec<Frame<'a>>,
    pending: Option<&'a Value>,
}

impl<'a> JsonTokenizer<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { stack: Vec::new(), pending: Some(value) }
    }

    fn open(&mut self, v: &'a Value) -> JsonToken {
        match v {
            Value::Object(m) => {
                self.stack.push(Frame::Object(m.iter()));
                JsonToken::BeginObject
            }
            Value::Array(a) => {
                self.stack.push(Frame::Array(a.iter()));
                JsonToken::BeginArray
            }
            Value::String(s) => JsonToken::String(s.clone()),
            Value::Number(n) => JsonToken::Number(n.clone()),
            Value::Bool(b) => JsonToken::Bool(*b),
            Value::Null => JsonToken::Null,
        }
    }
}

impl Iterator for JsonTokenizer<'_> {
    type Item = JsonToken;

    fn next(&mut self) -> Option<JsonToken> {
        if let Some(v) = self.pending.take() {
            return Some(self.open(v));
        }
        match self.stack.last_mut()? {
            Frame::Object(it) => match it.next() {
                Some((k, v)) => {
                    self.pending = Some(v);
                    Some(JsonToken::String(k.clone()))
                }
                None => {
                    self.stack.pop();
                    Some(JsonToken::EndObject)
                }
            },
            Frame::Array(it) => match it.next() {
                Some(v) => Some(self.open(v)),
                None => {
                    self.stack.pop();
                    Some(JsonToken::EndArray)
                }
            },
        }
    }
}

/// Stream `value` through a writer, letting `rewrite` replace any value-position scalar.
/// `rewrite` receives the writer path and the token and returns the token to emit.
pub fn rewrite_json<W, F>(value: &Value, out: W, prefix: &str, mut rewrite: F) -> Result<W, WriterError>
where
    W: io::Write,
    F: FnMut(&str, JsonToken) -> JsonToken,
{
    let mut w = JsonStreamWriter::new(out, prefix);
    for token in JsonTokenizer::new(value) {
        let is_value = !w.expects_field_name()
            && !matches!(token, JsonToken::BeginObject | JsonToken::EndObject | JsonToken::BeginArray | JsonToken::EndArray);
        let token = if is_value { rewrite(&w.path(), token) } else { token };
        w.write_token(&token)?;
    }
    Ok(w.into_inner())
}

/// Indented JSON for `map`, the same text `rewrite_json` emits with an identity rewrite.
pub fn to_indented_string(map: &Map<String, Value>) -> Result<String, WriterError> {
    let value = Value::Object(map.clone());
    let out = rewrite_json(&value, Vec::new(), "", |_, t| t)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(tokens: &[JsonToken]) -> String {
        let mut w = JsonStreamWriter::new(Vec::new(), "");
        for t in tokens {
            w.write_token(t).unwrap();
        }
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn flat_object_has_no_trailing_comma() {
        let tokens = [
            JsonToken::BeginObject,
            JsonToken::String("key1".into()),
            JsonToken::Number(123.into()),
            JsonToken::String("key2".into()),
            JsonToken::Bool(true),
            JsonToken::EndObject,
        ];
        assert_eq!(render(&tokens), "{\n  \"key1\": 123,\n  \"key2\": true\n}");
    }

    #[test]
    fn nested_structures_indent_per_level() {
        let v = json!({"a": {"b": [1, "x", {"c": null}]}, "d": []});
        let tokens: Vec<_> = JsonTokenizer::new(&v).collect();
        let expected = "{\n  \"a\": {\n    \"b\": [\n      1,\n      \"x\",\n      {\n        \"c\": null\n      }\n    ]\n  },\n  \"d\": [\n  ]\n}";
        assert_eq!(render(&tokens), expected);
        let back: Value = serde_json::from_str(expected).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn prefix_applies_to_every_line() {
        let v = json!({"k": 1});
        let out = rewrite_json(&v, Vec::new(), "> ", |_, t| t).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "> {\n>   \"k\": 1\n> }");
    }

    #[test]
    fn path_tracks_field_names() {
        let v = json!({"spec": {"template": {"userData": "aGVsbG8=", "name": "n"}, "list": ["a"]}});
        let mut paths = Vec::new();
        let out = rewrite_json(&v, Vec::new(), "", |path, t| {
            paths.push(path.to_string());
            match t {
                JsonToken::String(_) if path.ends_with(".userData") => JsonToken::String("<redacted>".into()),
                other => other,
            }
        })
        .unwrap();
        assert_eq!(paths, vec!["spec.template.userData", "spec.template.name", "spec.list"]);
        let back: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(back["spec"]["template"]["userData"], "<redacted>");
        assert_eq!(back["spec"]["template"]["name"], "n");
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let mut w = JsonStreamWriter::new(Vec::new(), "");
        w.write_token(&JsonToken::BeginObject).unwrap();
        match w.write_token(&JsonToken::Number(1.into())) {
            Err(WriterError::UnexpectedToken { state, token }) => {
                assert_eq!(state, "{");
                assert_eq!(token, "1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(w.write_token(&JsonToken::EndArray).is_err());
        assert!(w.write_token(&JsonToken::BeginArray).is_err());
    }
}
