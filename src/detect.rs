use serde_json::Value;

/// Annotation keys used by the multi-network CNI to attach extra interfaces.
const NETWORK_ANNOTATIONS: [&str; 2] = [
    "k8s.v1.cni.cncf.io/resource",
    "k8s.v1.cni.cncf.io/networks",
];

/// Extended resource namespace published by the macvtap device plugin.
const MACVTAP_RESOURCE_PREFIX: &str = "macvtap.network.kubevirt.io/";

const MACVTAP: &str = "macvtap";

/// Returns true if the pod asks for a macvtap interface, either through a
/// multi-network annotation or through an extended resource on one of its
/// containers.
///
/// This is a permissive substring match, not a parse of the network selection
/// annotation. A pod that merely mentions macvtap in a matching annotation
/// value is treated as a user of the feature.
pub fn uses_macvtap(pod: &Value) -> bool {
    if let Some(annotations) = pod
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(Value::as_object)
    {
        for (key, value) in annotations {
            let key = key.to_lowercase();
            if !NETWORK_ANNOTATIONS.iter().any(|a| key.contains(a)) {
                continue;
            }
            if value
                .as_str()
                .is_some_and(|v| v.to_lowercase().contains(MACVTAP))
            {
                return true;
            }
        }
    }

    let Some(spec) = pod.get("spec").and_then(Value::as_object) else {
        return false;
    };

    ["initContainers", "containers"].iter().any(|field| {
        spec.get(*field)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .any(container_requests_macvtap)
    })
}

fn container_requests_macvtap(container: &Value) -> bool {
    let Some(resources) = container.get("resources").and_then(Value::as_object) else {
        return false;
    };

    ["limits", "requests"].iter().any(|section| {
        resources
            .get(*section)
            .and_then(Value::as_object)
            .is_some_and(|names| names.keys().any(|name| is_macvtap_resource(name)))
    })
}

fn is_macvtap_resource(resource: &str) -> bool {
    let resource = resource.to_lowercase();
    resource.starts_with(MACVTAP_RESOURCE_PREFIX) || resource.contains(MACVTAP)
}
