//! Label selector encoding.

use std::collections::BTreeMap;

/// Escape a selector value: `\`, `,` and `=` are prefixed with a backslash.
pub fn escape_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for ch in v.chars() {
        if matches!(ch, '\\' | ',' | '=') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Encode labels as `k=v[,k=v...]`. Selectors are sets; callers must not rely on pair order.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, escape_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_joins_pairs() {
        let labels = BTreeMap::from([
            ("addons.example.org/dashboard".to_string(), "dash".to_string()),
            ("team".to_string(), "infra".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "addons.example.org/dashboard=dash,team=infra");
    }

    #[test]
    fn selector_escapes_reserved_characters() {
        assert_eq!(escape_value(r"a,b=c\d"), r"a\,b\=c\\d");
        let labels = BTreeMap::from([("k".to_string(), "x,y".to_string())]);
        assert_eq!(label_selector(&labels), r"k=x\,y");
    }

    #[test]
    fn empty_labels_encode_empty_selector() {
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }
}
