#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use kdecl_transform::{render, rewrite_json, split_sections, sort_slice, JsonStreamWriter, JsonToken, Transformer};
use serde_json::{json, Value};

#[test]
fn sectioned_template_renders_each_document() {
    let raw = "kind: ConfigMap\r\ndata:\r\n  a: {{ a }}\r\n---\r\nkind: Secret\r\n";
    let sections = split_sections(raw.as_bytes());
    assert_eq!(sections.len(), 2);
    let first = String::from_utf8(sections[0].clone()).unwrap();
    let out = render(&first, json!({"a": 1}), &BTreeMap::new(), true).unwrap();
    assert_eq!(out, "kind: ConfigMap\ndata:\n  a: 1");
}

#[test]
fn indent_helper_matches_block_layout() {
    let out = render("{{ line | indent(2) }}", json!({"line": "this is a line of\ntext"}), &BTreeMap::new(), true).unwrap();
    assert_eq!(out, "this is a line of\n  text");
}

#[test]
fn stream_writer_exact_layout() {
    let mut w = JsonStreamWriter::new(Vec::new(), "");
    for t in [
        JsonToken::BeginObject,
        JsonToken::String("key1".into()),
        JsonToken::Number(123.into()),
        JsonToken::String("key2".into()),
        JsonToken::Bool(true),
        JsonToken::EndObject,
    ] {
        w.write_token(&t).unwrap();
    }
    assert_eq!(String::from_utf8(w.into_inner()).unwrap(), "{\n  \"key1\": 123,\n  \"key2\": true\n}");
}

#[test]
fn tree_then_stream_rewrite() {
    let mut doc = match json!({
        "spec": {"hosts": ["b", "a"], "secret": {"data": "c2VjcmV0"}}
    }) {
        Value::Object(m) => m,
        _ => unreachable!(),
    };
    let mut t = Transformer::new();
    t.add_slice_transform(|_, seq| Ok(sort_slice(seq)?));
    t.transform(&mut doc).unwrap();

    let out = rewrite_json(&Value::Object(doc), Vec::new(), "", |path, token| {
        if path.ends_with(".data") {
            JsonToken::String("...".into())
        } else {
            token
        }
    })
    .unwrap();
    let back: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(back, json!({"spec": {"hosts": ["a", "b"], "secret": {"data": "..."}}}));
}
