use crate::path::{FieldPath, PathElement};
use crate::reflect::{FieldInfo, Reflect, Shape};
use crate::FieldPathError;

/// Visitor verdict for [`reflect_recursive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    /// Do not descend into the value just visited.
    SkipReflection,
}

/// Depth-first walk emitting `(path, field, value)` for every reachable value, root first.
///
/// Hidden fields are not visited. Empty options are visited but not descended into;
/// a populated option is transparent (its contents appear under the option's path).
pub fn reflect_recursive<F>(root: &dyn Reflect, mut visitor: F) -> Result<(), FieldPathError>
where
    F: FnMut(&FieldPath, Option<&FieldInfo>, &dyn Reflect) -> Result<Walk, FieldPathError>,
{
    let mut path = FieldPath::default();
    visit(root, &mut path, None, &mut visitor)
}

type Visitor<'a> = dyn FnMut(&FieldPath, Option<&FieldInfo>, &dyn Reflect) -> Result<Walk, FieldPathError> + 'a;

fn visit(
    v: &dyn Reflect,
    path: &mut FieldPath,
    info: Option<&FieldInfo>,
    visitor: &mut Visitor<'_>,
) -> Result<(), FieldPathError> {
    if visitor(path, info, v)? == Walk::SkipReflection {
        return Ok(());
    }
    descend(v, path, visitor)
}

fn descend(v: &dyn Reflect, path: &mut FieldPath, visitor: &mut Visitor<'_>) -> Result<(), FieldPathError> {
    match v.shape() {
        Shape::Pointer => {
            if let Some(inner) = v.pointee() {
                descend(inner, path, visitor)?;
            }
        }
        Shape::Struct => {
            for (i, info) in v.fields().iter().enumerate() {
                if info.hidden {
                    continue;
                }
                let Some(field) = v.field(i) else { continue };
                path.push(PathElement::Field(info.json.to_string()));
                visit(field, path, Some(info), visitor)?;
                path.pop();
            }
        }
        Shape::Slice => {
            for i in 0..v.len() {
                let Some(elem) = v.element(i) else { continue };
                path.push(PathElement::ArrayIndex(i));
                visit(elem, path, None, visitor)?;
                path.pop();
            }
        }
        Shape::Map => {
            for k in v.map_keys() {
                let Some(entry) = v.entry(&k) else { continue };
                path.push(PathElement::MapKey(k));
                visit(entry, path, None, visitor)?;
                path.pop();
            }
        }
        Shape::Scalar => {}
    }
    Ok(())
}

/// Compact rendering for logs: `{spec: {replicas: 3, containers: [{image: nginx}]}}`.
/// Empty options and empty collections are left out of records.
pub fn value_as_string(v: &dyn Reflect) -> String {
    let mut out = String::new();
    render(v, &mut out);
    out
}

fn is_empty(v: &dyn Reflect) -> bool {
    match v.shape() {
        Shape::Pointer => v.pointee().is_none(),
        Shape::Slice | Shape::Map => v.len() == 0,
        Shape::Scalar | Shape::Struct => false,
    }
}

fn render(v: &dyn Reflect, out: &mut String) {
    match v.shape() {
        Shape::Scalar => out.push_str(&v.display().unwrap_or_default()),
        Shape::Pointer => match v.pointee() {
            Some(inner) => render(inner, out),
            None => out.push_str("<nil>"),
        },
        Shape::Slice => {
            out.push('[');
            for i in 0..v.len() {
                if i != 0 {
                    out.push_str(", ");
                }
                if let Some(e) = v.element(i) {
                    render(e, out);
                }
            }
            out.push(']');
        }
        Shape::Map => {
            out.push('{');
            for (i, k) in v.map_keys().into_iter().enumerate() {
                if i != 0 {
                    out.push_str(", ");
                }
                out.push_str(&k);
                out.push_str(": ");
                if let Some(e) = v.entry(&k) {
                    render(e, out);
                }
            }
            out.push('}');
        }
        Shape::Struct => {
            out.push('{');
            let mut first = true;
            for (i, info) in v.fields().iter().enumerate() {
                let Some(field) = v.field(i).filter(|f| !info.hidden && !is_empty(*f)) else { continue };
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push_str(info.json);
                out.push_str(": ");
                render(field, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Default)]
    struct Limits {
        cpu: Option<String>,
        extra: BTreeMap<String, i64>,
    }

    #[derive(Debug, Default)]
    struct Node {
        name: String,
        limits: Option<Limits>,
        tags: Vec<String>,
        token: String,
    }

    crate::reflect_struct!(Limits { cpu => "cpu", extra => "extra" });
    crate::reflect_struct!(Node { name => "name", limits => "limits", tags => "tags", #[hidden] token => "token" });

    fn sample() -> Node {
        Node {
            name: "n1".into(),
            limits: Some(Limits { cpu: Some("2".into()), extra: BTreeMap::from([("gpu".to_string(), 1)]) }),
            tags: vec!["a".into(), "b".into()],
            token: "secret".into(),
        }
    }

    #[test]
    fn visits_depth_first_and_skips_hidden() {
        let mut seen = Vec::new();
        reflect_recursive(&sample(), |path, _, _| {
            seen.push(path.to_string());
            Ok(Walk::Continue)
        })
        .unwrap();
        assert_eq!(
            seen,
            vec!["", "name", "limits", "limits.cpu", "limits.extra", "limits.extra[gpu]", "tags", "tags[0]", "tags[1]"]
        );
    }

    #[test]
    fn skip_reflection_prunes_subtree() {
        let mut seen = Vec::new();
        reflect_recursive(&sample(), |path, info, _| {
            seen.push(path.to_string());
            if info.map(|i| i.json) == Some("limits") {
                return Ok(Walk::SkipReflection);
            }
            Ok(Walk::Continue)
        })
        .unwrap();
        assert!(seen.contains(&"limits".to_string()));
        assert!(!seen.iter().any(|p| p.starts_with("limits.")));
    }

    #[test]
    fn visitor_errors_abort_the_walk() {
        let mut count = 0;
        let err = reflect_recursive(&sample(), |path, _, _| {
            count += 1;
            if path.to_string() == "limits" {
                return Err(FieldPathError::UnknownField { name: "limits".into() });
            }
            Ok(Walk::Continue)
        })
        .unwrap_err();
        assert_eq!(err, FieldPathError::UnknownField { name: "limits".into() });
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_option_stops_descent() {
        let node = Node { limits: None, ..sample() };
        let mut seen = Vec::new();
        reflect_recursive(&node, |path, _, _| {
            seen.push(path.to_string());
            Ok(Walk::Continue)
        })
        .unwrap();
        assert!(seen.contains(&"limits".to_string()));
        assert!(!seen.iter().any(|p| p.starts_with("limits.")));
    }

    #[test]
    fn renders_compactly() {
        assert_eq!(value_as_string(&sample()), "{name: n1, limits: {cpu: 2, extra: {gpu: 1}}, tags: [a, b]}");
        let bare = Node::default();
        assert_eq!(value_as_string(&bare), "{name: }");
    }
}
