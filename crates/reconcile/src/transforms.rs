//! Stock object transformations.

use std::collections::BTreeMap;
use std::sync::Arc;

use kdecl_core::GroupKind;
use kdecl_manifest::{ManifestError, ManifestObject, ManifestObjects};
use serde_json::{json, Value as Json};
use tracing::warn;

use crate::options::{LabelMaker, ObjectTransform};

const APPLICATION_GROUP: &str = "app.k8s.io";
const APPLICATION_KIND: &str = "Application";

/// Point every container image at `registry` and, when `pull_secret` is set, make it
/// the only image pull secret. Empty arguments leave the respective field alone.
pub fn image_registry(registry: impl Into<String>, pull_secret: impl Into<String>) -> ObjectTransform {
    let registry = registry.into();
    let pull_secret = pull_secret.into();
    Arc::new(move |_, objects| {
        for o in objects.iter_mut() {
            apply_image_registry(o, &registry, &pull_secret)?;
        }
        Ok(())
    })
}

pub fn apply_image_registry(o: &mut ManifestObject, registry: &str, pull_secret: &str) -> Result<(), ManifestError> {
    if !registry.is_empty() {
        o.mutate_containers::<_, ManifestError>(|container| {
            if let Some(Json::String(image)) = container.get_mut("image") {
                *image = rewrite_image(registry, image);
            }
            Ok(())
        })?;
    }
    if !pull_secret.is_empty() {
        o.mutate_pod_spec::<_, ManifestError>(|pod_spec| {
            pod_spec.insert("imagePullSecrets".into(), json!([{ "name": pull_secret }]));
            Ok(())
        })?;
    }
    Ok(())
}

/// `registry/<rest>` where `<rest>` is what is left after dropping at most two leading
/// path segments of `image`.
pub fn rewrite_image(registry: &str, image: &str) -> String {
    let segments: Vec<&str> = image.splitn(3, '/').collect();
    let rest = segments.last().copied().unwrap_or(image);
    if rest.contains('/') || (segments.len() > 1 && segments[0].contains(':')) {
        warn!(image, registry, "image path does not fit registry/name; rewrite may be surprising");
    }
    format!("{}/{}", registry, rest)
}

/// Fill in the single `app.k8s.io` Application, if any, with the selector labels and
/// the kinds of every other object.
pub fn application_components(label_maker: LabelMaker) -> ObjectTransform {
    Arc::new(move |instance, objects| {
        let labels = label_maker(instance);
        set_application_components(objects, &labels)
    })
}

fn is_application(o: &ManifestObject) -> bool {
    o.group() == APPLICATION_GROUP && o.kind() == APPLICATION_KIND
}

pub fn set_application_components(objects: &mut ManifestObjects, labels: &BTreeMap<String, String>) -> anyhow::Result<()> {
    let apps: Vec<usize> = objects.iter().enumerate().filter(|(_, o)| is_application(o)).map(|(i, _)| i).collect();
    let index = match apps.as_slice() {
        [] => return Ok(()),
        [i] => *i,
        _ => anyhow::bail!("manifest contains {} Application objects; at most one is supported", apps.len()),
    };

    let mut kinds: Vec<GroupKind> = objects.iter().filter(|o| !is_application(o)).map(|o| o.group_kind()).collect();
    kinds.sort_by_cached_key(|gk| gk.to_string());
    kinds.dedup();
    let components: Vec<Json> = kinds.iter().map(|gk| json!({ "group": gk.group, "kind": gk.kind })).collect();

    let app = &mut objects.items[index];
    app.set_nested_string_map(labels, &["spec", "selector", "matchLabels"])?;
    app.set_nested_field(Json::Array(components), &["spec", "componentGroupKinds"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdecl_manifest::parse_objects;

    const WORKLOADS: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      initContainers:
      - name: init
        image: busybox
      containers:
      - name: web
        image: gcr.io/google-containers/nginx:1.25
      imagePullSecrets:
      - name: old
---
apiVersion: batch/v1
kind: CronJob
metadata:
  name: tick
spec:
  jobTemplate:
    spec:
      template:
        spec:
          containers:
          - name: tick
            image: library/alpine
---
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
  - port: 80
"#;

    #[test]
    fn image_rewrite_keeps_last_segment() {
        assert_eq!(rewrite_image("mirror.local", "nginx"), "mirror.local/nginx");
        assert_eq!(rewrite_image("mirror.local", "library/nginx:1.25"), "mirror.local/nginx:1.25");
        assert_eq!(rewrite_image("mirror.local", "gcr.io/proj/app@sha256:abc"), "mirror.local/app@sha256:abc");
        assert_eq!(rewrite_image("mirror.local", "gcr.io/proj/sub/app"), "mirror.local/sub/app");
        assert_eq!(rewrite_image("mirror.local", "host:5000/img"), "mirror.local/img");
    }

    #[test]
    fn registry_transform_touches_every_pod_spec() {
        let mut objects = parse_objects(WORKLOADS).unwrap();
        for o in objects.iter_mut() {
            apply_image_registry(o, "mirror.local", "regcred").unwrap();
        }
        let deploy = &objects.items[0];
        let pod = deploy.nested_field(&["spec", "template", "spec"]).unwrap();
        assert_eq!(pod["initContainers"][0]["image"], "mirror.local/busybox");
        assert_eq!(pod["containers"][0]["image"], "mirror.local/nginx:1.25");
        assert_eq!(pod["imagePullSecrets"], json!([{ "name": "regcred" }]));

        let cron = &objects.items[1];
        let pod = cron.nested_field(&["spec", "jobTemplate", "spec", "template", "spec"]).unwrap();
        assert_eq!(pod["containers"][0]["image"], "mirror.local/alpine");
        assert_eq!(pod["imagePullSecrets"], json!([{ "name": "regcred" }]));

        assert!(objects.items[2].nested_field(&["spec", "imagePullSecrets"]).is_none());
    }

    #[test]
    fn empty_pull_secret_leaves_secrets_alone() {
        let mut objects = parse_objects(WORKLOADS).unwrap();
        apply_image_registry(&mut objects.items[0], "mirror.local", "").unwrap();
        let pod = objects.items[0].nested_field(&["spec", "template", "spec"]).unwrap();
        assert_eq!(pod["imagePullSecrets"], json!([{ "name": "old" }]));
    }

    #[test]
    fn application_lists_component_kinds() {
        let manifest = format!(
            "{}\n---\napiVersion: app.k8s.io/v1beta1\nkind: Application\nmetadata:\n  name: web\nspec: {{}}\n",
            WORKLOADS
        );
        let mut objects = parse_objects(&manifest).unwrap();
        objects.items.retain(|o| o.kind() != "CronJob");
        let labels = BTreeMap::from([("addons.example.org/dashboard".to_string(), "web".to_string())]);
        set_application_components(&mut objects, &labels).unwrap();

        let app = objects.iter().find(|o| is_application(o)).unwrap();
        assert_eq!(
            app.nested_field(&["spec", "componentGroupKinds"]).unwrap(),
            &json!([{ "group": "apps", "kind": "Deployment" }, { "group": "", "kind": "Service" }])
        );
        assert_eq!(app.nested_string_map(&["spec", "selector", "matchLabels"]).unwrap(), labels);
    }

    #[test]
    fn application_count_is_checked() {
        let mut none = parse_objects(WORKLOADS).unwrap();
        let before = none.clone();
        set_application_components(&mut none, &BTreeMap::new()).unwrap();
        assert_eq!(none, before);

        let app = "apiVersion: app.k8s.io/v1beta1\nkind: Application\nmetadata:\n  name: a\n";
        let mut two = parse_objects(&format!("{app}---\n{}", app.replace("name: a", "name: b"))).unwrap();
        let err = set_application_components(&mut two, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("2 Application objects"), "{err}");
    }
}
