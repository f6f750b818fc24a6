/// Deployment-order rank for a `(group, kind)`. Lower ranks apply first.
///
/// Types are established before instances, identities before their bindings,
/// config before the pods that mount it, and Services last.
pub fn default_object_order(_group: &str, kind: &str) -> i32 {
    match kind {
        "CustomResourceDefinition" => -1000,
        "ServiceAccount" | "ClusterRole" => 1,
        "ClusterRoleBinding" => 2,
        "ConfigMap" | "Secret" => 100,
        "Deployment" => 1000,
        "HorizontalPodAutoscaler" => 1001,
        "Service" => 10000,
        _ => 1000,
    }
}
