use serde::{Deserialize, Serialize};
use serde_json::map::Map;
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::error;

use crate::{detect, patch};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionRequest {
    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub kind: GroupVersionKind,

    /// The object under review, kept raw so that a pod which fails to parse
    /// is a policy decision rather than an envelope decode failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Box<RawValue>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,

    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub patch: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
    #[serde(rename = "JSONMergePatch")]
    JsonMergePatch,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
            patch: None,
            patch_type: None,
        }
    }

    pub fn deny(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(Status {
                message: message.into(),
            }),
            patch: None,
            patch_type: None,
        }
    }

    pub fn with_patch(mut self, patch: Vec<u8>) -> Self {
        self.patch = Some(patch);
        self.patch_type = Some(PatchType::JsonMergePatch);
        self
    }
}

/// Decides the verdict for one admission request.
///
/// Fail-open: the only deny is a pod object that fails to parse. Anything
/// that is not a pod, carries no request, or does not use macvtap is allowed
/// untouched, and the uid travels back verbatim in every branch.
pub fn handle(request: Option<&AdmissionRequest>) -> AdmissionResponse {
    let Some(request) = request else {
        return AdmissionResponse::allow("");
    };

    if !request.kind.kind.eq_ignore_ascii_case("Pod") {
        return AdmissionResponse::allow(request.uid.as_str());
    }

    let raw = request.object.as_deref().map_or("", RawValue::get);
    let pod: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(pod) => pod,
        Err(e) => {
            error!(uid = %request.uid, %e, "failed to deserialize pod object");
            return AdmissionResponse::deny(request.uid.as_str(), e.to_string());
        }
    };
    let pod = Value::Object(pod);

    if !detect::uses_macvtap(&pod) {
        return AdmissionResponse::allow(request.uid.as_str());
    }

    match patch::build_patch(&pod) {
        Ok(Some(bytes)) => AdmissionResponse::allow(request.uid.as_str()).with_patch(bytes),
        Ok(None) => AdmissionResponse::allow(request.uid.as_str()),
        Err(e) => {
            error!(uid = %request.uid, %e, "failed to serialize merge patch");
            AdmissionResponse::deny(request.uid.as_str(), e.to_string())
        }
    }
}

/// `response.patch` travels as a base64 string on the wire.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        patch: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match patch {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
