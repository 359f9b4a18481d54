use std::collections::HashSet;

use serde::Serialize;
use serde_json::map::Map;
use serde_json::{json, Value};

/// Capabilities a macvtap passthrough device needs, appended in this order.
pub const REQUIRED_CAPABILITIES: [&str; 3] = ["DAC_OVERRIDE", "NET_ADMIN", "SYS_RAWIO"];

/// The rewritten security context subtree. Unrecognized keys from the
/// existing subtree are carried through `other` so the rebuild never drops
/// user-supplied fields.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityContext {
    privileged: bool,
    capabilities: Capabilities,
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize)]
struct Capabilities {
    add: Vec<Value>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

/// Builds the merge patch for a pod that uses macvtap, or `None` when no
/// container needs a change.
///
/// Merge patch semantics replace arrays wholesale, so a container list is
/// either absent from the patch or emitted in full.
pub fn build_patch(pod: &Value) -> serde_json::Result<Option<Vec<u8>>> {
    let Some(spec) = pod.get("spec").and_then(Value::as_object) else {
        return Ok(None);
    };

    let mut patch_spec = Map::new();
    for field in ["initContainers", "containers"] {
        if let Some(list) = spec.get(field).and_then(Value::as_array) {
            let (mutated, changed) = plan_containers(list);
            if changed {
                patch_spec.insert(field.to_owned(), Value::Array(mutated));
            }
        }
    }

    if patch_spec.is_empty() {
        return Ok(None);
    }

    serde_json::to_vec(&json!({ "spec": patch_spec })).map(Some)
}

/// Plans the mutation for one container list. Returns the rebuilt list and
/// whether any member actually changed. The input is never mutated; list
/// elements that are not objects pass through untouched.
pub fn plan_containers(containers: &[Value]) -> (Vec<Value>, bool) {
    let mut mutated = Vec::with_capacity(containers.len());
    let mut any_changed = false;

    for container in containers {
        let Some(container) = container.as_object() else {
            mutated.push(container.clone());
            continue;
        };
        let (planned, changed) = plan_container(container);
        any_changed |= changed;
        mutated.push(Value::Object(planned));
    }

    (mutated, any_changed)
}

fn plan_container(container: &Map<String, Value>) -> (Map<String, Value>, bool) {
    let mut copy = container.clone();
    let mut changed = false;

    let security_context = copy
        .get("securityContext")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if !security_context
        .get("privileged")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        changed = true;
    }

    let capabilities = security_context
        .get("capabilities")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut add = capabilities
        .get("add")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut have: HashSet<String> = add
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect();

    for capability in REQUIRED_CAPABILITIES {
        if have.insert(capability.to_owned()) {
            add.push(Value::String(capability.to_owned()));
            changed = true;
        }
    }

    let rebuilt = SecurityContext {
        privileged: true,
        capabilities: Capabilities {
            add,
            other: strip(capabilities, &["add"]),
        },
        other: strip(security_context, &["privileged", "capabilities"]),
    };
    // to_value of JSON-native fields cannot fail
    copy.insert(
        "securityContext".to_owned(),
        serde_json::to_value(rebuilt).unwrap_or_default(),
    );

    (copy, changed)
}

fn strip(mut map: Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    for key in keys {
        map.remove(*key);
    }
    map
}
