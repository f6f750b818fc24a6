#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kdecl_fieldpath::{find_set_fields, reflect_scalar, reflect_struct, set_string, unset, FieldPathError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
struct FakeEnum(String);

impl FromStr for FakeEnum {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FakeEnum(s.to_string()))
    }
}

impl fmt::Display for FakeEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

reflect_scalar!(FakeEnum);

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FakeObject {
    spec: FakeSpec,
    status: FakeStatus,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FakeSpec {
    containers: Vec<FakeContainer>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FakeContainer {
    image: String,
    policy: Option<FakePolicy>,
    resources: Option<FakeResources>,
    int_pointer: Option<i32>,
    int32_pointer: Option<i32>,
    int64_pointer: Option<i64>,
    int: Option<i32>,
    int32: Option<i32>,
    int64: Option<i64>,
    #[serde(rename = "enum")]
    enum_value: FakeEnum,
    enum_slice: Vec<FakeEnum>,
    #[serde(skip)]
    generation: i64,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FakePolicy {
    name: String,
    allow: bool,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FakeResources {
    limits: BTreeMap<String, i64>,
    requests: BTreeMap<String, i64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct FakeStatus {}

reflect_struct!(FakeObject { spec => "spec", status => "status" });
reflect_struct!(FakeSpec { containers => "containers" });
reflect_struct!(FakeContainer {
    image => "image",
    policy => "policy",
    resources => "resources",
    int_pointer => "intPointer",
    int32_pointer => "int32Pointer",
    int64_pointer => "int64Pointer",
    int => "int",
    int32 => "int32",
    int64 => "int64",
    enum_value => "enum",
    enum_slice => "enumSlice",
    #[hidden] generation => "generation",
});
reflect_struct!(FakePolicy { name => "name", allow => "allow" });
reflect_struct!(FakeResources { limits => "limits", requests => "requests" });
reflect_struct!(FakeStatus {});

fn obj(s: &str) -> FakeObject {
    serde_json::from_str(&s.replace('\'', "\"")).unwrap()
}

#[test]
fn set_string_grid() {
    let empty = "{ 'spec': { 'containers': [ {} ] } }";
    let grid = [
        ("simple setting", empty, "spec.containers[0].image", "hello-world", "{ 'spec': { 'containers': [ { 'image': 'hello-world' } ] } }"),
        ("setting with wildcard", empty, "spec.containers[*].image", "hello-world", "{ 'spec': { 'containers': [ { 'image': 'hello-world' } ] } }"),
        ("creating missing objects", empty, "spec.containers[0].policy.name", "allowed", "{ 'spec': { 'containers': [ { 'policy': { 'name': 'allowed' } } ] } }"),
        ("set int", empty, "spec.containers[0].int", "123", "{ 'spec': { 'containers': [ { 'int': 123 } ] } }"),
        ("set int32", empty, "spec.containers[0].int32", "123", "{ 'spec': { 'containers': [ { 'int32': 123 } ] } }"),
        ("set int64", empty, "spec.containers[0].int64", "123", "{ 'spec': { 'containers': [ { 'int64': 123 } ] } }"),
        ("set int pointer", empty, "spec.containers[0].intPointer", "123", "{ 'spec': { 'containers': [ { 'intPointer': 123 } ] } }"),
        ("set int64 pointer", empty, "spec.containers[0].int64Pointer", "123", "{ 'spec': { 'containers': [ { 'int64Pointer': 123 } ] } }"),
        ("set enum", empty, "spec.containers[0].enum", "ABC", "{ 'spec': { 'containers': [ { 'enum': 'ABC' } ] } }"),
        ("set enum slice", empty, "spec.containers[0].enumSlice", "ABC,DEF", "{ 'spec': { 'containers': [ { 'enumSlice': [ 'ABC', 'DEF' ] } ] } }"),
        (
            "append enum slice",
            "{ 'spec': { 'containers': [ { 'enumSlice': [ 'ABC', 'DEF' ] } ] } }",
            "spec.containers[0].enumSlice",
            "GHI,JKL",
            "{ 'spec': { 'containers': [ { 'enumSlice': [ 'ABC', 'DEF', 'GHI', 'JKL' ] } ] } }",
        ),
        (
            "map key through missing pointer",
            empty,
            "spec.containers[0].resources.limits[cpu]",
            "2",
            "{ 'spec': { 'containers': [ { 'resources': { 'limits': { 'cpu': 2 } } } ] } }",
        ),
        ("field by rust name", empty, "spec.containers[0].enum_slice", "X", "{ 'spec': { 'containers': [ { 'enumSlice': [ 'X' ] } ] } }"),
    ];
    for (name, input, path, value, expected) in grid {
        let mut c = obj(input);
        set_string(&mut c, path, value).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(c, obj(expected), "{name}");
    }
}

#[test]
fn wildcard_reaches_every_element() {
    let mut c = obj("{ 'spec': { 'containers': [ {}, { 'image': 'old' }, {} ] } }");
    set_string(&mut c, "spec.containers[*].image", "new").unwrap();
    assert!(c.spec.containers.iter().all(|k| k.image == "new"));
}

#[test]
fn set_string_is_idempotent() {
    for (path, value) in [
        ("spec.containers[*].image", "hello-world"),
        ("spec.containers[0].int64", "123"),
        ("spec.containers[0].enumSlice", "ABC,DEF"),
        ("spec.containers[0].policy.allow", "true"),
    ] {
        let mut c = obj("{ 'spec': { 'containers': [ {} ] } }");
        set_string(&mut c, path, value).unwrap();
        let once = serde_json::to_value(&c).unwrap();
        set_string(&mut c, path, value).unwrap();
        assert_eq!(serde_json::to_value(&c).unwrap(), once, "{path}");
    }
}

#[test]
fn set_string_invalid_paths() {
    let grid = [
        ("spec.containers[*].wrongImagePathName", "field spec.containers[*].wrongImagePathName not found in FakeObject"),
        ("spec.containers[0].policy.wrongPolicyName", "field spec.containers[0].policy.wrongPolicyName not found in FakeObject"),
        ("spec.wrongNameContainers[0].int", "field spec.wrongNameContainers[0].int not found in FakeObject"),
        ("spec.containers[0].int32100", "field spec.containers[0].int32100 not found in FakeObject"),
        ("wrong.path.check", "field wrong.path.check not found in FakeObject"),
    ];
    for (path, expected) in grid {
        let mut c = obj("{ 'spec': { 'containers': [ {} ] } }");
        let err = set_string(&mut c, path, "hello-world").unwrap_err();
        assert_eq!(err.to_string(), expected);
        // Speculatively allocated intermediates are released again.
        assert_eq!(c, obj("{ 'spec': { 'containers': [ {} ] } }"), "{path}");
    }
}

#[test]
fn conversion_and_immutable_errors() {
    let mut c = obj("{ 'spec': { 'containers': [ {} ] } }");
    match set_string(&mut c, "spec.containers[0].int64", "12x") {
        Err(FieldPathError::Conversion { path, value, .. }) => {
            assert_eq!(path, "spec.containers[0].int64");
            assert_eq!(value, "12x");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(c.spec.containers[0].int64, None);

    assert_eq!(
        set_string(&mut c, "spec.containers[0].generation", "3"),
        Err(FieldPathError::ImmutableField { path: "spec.containers[0].generation".into() })
    );
    assert!(matches!(set_string(&mut c, "spec..image", "x"), Err(FieldPathError::Parse { .. })));
}

#[test]
fn unset_grid() {
    let grid = [
        ("{ 'spec': { 'containers': [ { 'image': 'hello-world' } ] } }", "spec.containers[0].image", "{ 'spec': { 'containers': [ {} ] } }"),
        ("{ 'spec': { 'containers': [ { 'image': 'hello-world' } ] } }", "spec.containers[*].image", "{ 'spec': { 'containers': [ {} ] } }"),
        ("{ 'spec': { 'containers': [ { 'int': 123 } ] } }", "spec.containers[0].int", "{ 'spec': { 'containers': [ {} ] } }"),
        ("{ 'spec': { 'containers': [ { 'int32Pointer': 123 } ] } }", "spec.containers[0].int32Pointer", "{ 'spec': { 'containers': [ {} ] } }"),
        ("{ 'spec': { 'containers': [ { 'enum': 'ABC' } ] } }", "spec.containers[0].enum", "{ 'spec': { 'containers': [ { 'enum': '' } ] } }"),
        ("{ 'spec': { 'containers': [ { 'enumSlice': [ 'ABC', 'DEF' ] } ] } }", "spec.containers[0].enumSlice", "{ 'spec': { 'containers': [ {} ] } }"),
    ];
    for (input, path, expected) in grid {
        let mut c = obj(input);
        unset(&mut c, path).unwrap();
        assert_eq!(c, obj(expected), "{path}");
    }
}

#[test]
fn unset_invalid_paths() {
    let mut c = obj("{ 'spec': { 'containers': [ { 'policy': { 'name': 'allowed' } } ] } }");
    assert_eq!(
        unset(&mut c, "spec.containers[0].policy.wrongPolicyName").unwrap_err().to_string(),
        "field spec.containers[0].policy.wrongPolicyName not found in FakeObject"
    );
    assert!(unset(&mut c, "spec.containers[*].wrongImagePathName").is_err());
}

#[test]
fn find_set_fields_reports_populated_pointers() {
    let c = obj("{ 'spec': { 'containers': [ { 'policy': {}, 'int64': 5 } ] } }");
    let k = &c.spec.containers[0];
    let set = find_set_fields(k, &["policy", "resources", "int64", "intPointer"]).unwrap();
    assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["int64", "policy"]);

    assert_eq!(find_set_fields(k, &["image"]), Err(FieldPathError::NotAPointer { field: "image".into() }));
    assert_eq!(find_set_fields(k, &["nope"]), Err(FieldPathError::UnknownField { name: "nope".into() }));
    assert_eq!(find_set_fields(k, &["generation"]), Err(FieldPathError::UnknownField { name: "generation".into() }));
}
