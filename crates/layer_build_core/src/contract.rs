use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{BuildErrorKind, EventDecodeError};
use crate::package_spec::PackageSpec;

pub const PROPERTY_PACKAGE_NAME: &str = "PackageName";
pub const PROPERTY_OUTPUT_BUCKET: &str = "OutputBucket";
pub const PROPERTY_BUILD_TARGET: &str = "BuildTarget";

pub const DATA_OUTPUT_KEY: &str = "OutputKey";
pub const DATA_OUTPUT_BUCKET: &str = "OutputBucket";
pub const DATA_DESCRIPTION: &str = "Description";
pub const DATA_FINGERPRINT: &str = "Fingerprint";

pub const MAX_LOGICAL_ID_LEN: usize = 255;

pub type OutputData = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Create,
    Update,
    Delete,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

/// Custom-resource lifecycle request exactly as the provisioning system sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningEventEnvelope {
    pub request_type: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
}

impl ProvisioningEventEnvelope {
    pub fn from_value(event: Value) -> Result<Self, EventDecodeError> {
        if !event.is_object() {
            return Err(EventDecodeError::Malformed(
                "event payload must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(event)
            .map_err(|error| EventDecodeError::Malformed(error.to_string()))
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.resource_properties
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Fallbacks applied when an event omits optional properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeDefaults {
    pub default_bucket: Option<String>,
    pub default_build_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerBuildProperties {
    pub package_spec: PackageSpec,
    pub output_bucket: String,
    pub build_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    Create {
        logical_id: String,
        properties: LayerBuildProperties,
    },
    Update {
        logical_id: String,
        physical_id: String,
        properties: LayerBuildProperties,
    },
    /// Properties are optional here: a Delete must never fail on bad input.
    Delete {
        logical_id: String,
        physical_id: String,
        output_bucket: Option<String>,
    },
}

impl ProvisioningEvent {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Create { .. } => RequestKind::Create,
            Self::Update { .. } => RequestKind::Update,
            Self::Delete { .. } => RequestKind::Delete,
        }
    }

    pub fn logical_id(&self) -> &str {
        match self {
            Self::Create { logical_id, .. }
            | Self::Update { logical_id, .. }
            | Self::Delete { logical_id, .. } => logical_id,
        }
    }

    pub fn physical_id(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => None,
            Self::Update { physical_id, .. } | Self::Delete { physical_id, .. } => {
                Some(physical_id)
            }
        }
    }
}

pub fn decode_event(
    envelope: &ProvisioningEventEnvelope,
    defaults: &DecodeDefaults,
) -> Result<ProvisioningEvent, EventDecodeError> {
    let kind = match envelope.request_type.as_str() {
        "Create" => RequestKind::Create,
        "Update" => RequestKind::Update,
        "Delete" => RequestKind::Delete,
        other => return Err(EventDecodeError::UnknownRequestType(other.to_string())),
    };
    let logical_id = validate_logical_id(&envelope.logical_resource_id)?;

    let physical_id = || {
        envelope
            .physical_resource_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(EventDecodeError::MissingPhysicalId(kind.as_str()))
    };

    match kind {
        RequestKind::Create => Ok(ProvisioningEvent::Create {
            logical_id,
            properties: decode_properties(envelope, defaults)?,
        }),
        RequestKind::Update => Ok(ProvisioningEvent::Update {
            logical_id,
            physical_id: physical_id()?,
            properties: decode_properties(envelope, defaults)?,
        }),
        RequestKind::Delete => Ok(ProvisioningEvent::Delete {
            logical_id,
            physical_id: physical_id()?,
            output_bucket: envelope
                .property(PROPERTY_OUTPUT_BUCKET)
                .map(str::to_string)
                .or_else(|| defaults.default_bucket.clone()),
        }),
    }
}

fn decode_properties(
    envelope: &ProvisioningEventEnvelope,
    defaults: &DecodeDefaults,
) -> Result<LayerBuildProperties, EventDecodeError> {
    let raw_spec = envelope
        .property(PROPERTY_PACKAGE_NAME)
        .ok_or(EventDecodeError::MissingProperty(PROPERTY_PACKAGE_NAME))?;
    let package_spec = PackageSpec::parse(raw_spec)?;

    let output_bucket = envelope
        .property(PROPERTY_OUTPUT_BUCKET)
        .map(str::to_string)
        .or_else(|| defaults.default_bucket.clone())
        .ok_or(EventDecodeError::MissingProperty(PROPERTY_OUTPUT_BUCKET))?;

    let build_target = envelope
        .property(PROPERTY_BUILD_TARGET)
        .map(str::to_string)
        .unwrap_or_else(|| defaults.default_build_target.clone());

    Ok(LayerBuildProperties {
        package_spec,
        output_bucket,
        build_target,
    })
}

fn validate_logical_id(raw: &str) -> Result<String, EventDecodeError> {
    let logical_id = raw.trim();
    if logical_id.is_empty() {
        return Err(EventDecodeError::InvalidLogicalId("cannot be empty"));
    }
    if logical_id.len() > MAX_LOGICAL_ID_LEN {
        return Err(EventDecodeError::InvalidLogicalId("is too long"));
    }
    if logical_id.contains('/') {
        return Err(EventDecodeError::InvalidLogicalId("cannot contain '/'"));
    }
    Ok(logical_id.to_string())
}

/// Content identity of a build: the canonical spec plus the build target.
pub fn artifact_fingerprint(spec: &PackageSpec, build_target: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [spec.as_str(), build_target] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildArtifact {
    pub container: String,
    pub key: String,
    pub description: String,
    pub fingerprint: String,
    pub size_bytes: u64,
}

impl BuildArtifact {
    pub fn describe(spec: &PackageSpec, build_target: &str) -> String {
        format!("{spec} for {build_target}")
    }

    pub fn output_data(&self) -> OutputData {
        BTreeMap::from([
            (DATA_OUTPUT_KEY.to_string(), self.key.clone()),
            (DATA_OUTPUT_BUCKET.to_string(), self.container.clone()),
            (DATA_DESCRIPTION.to_string(), self.description.clone()),
            (DATA_FINGERPRINT.to_string(), self.fingerprint.clone()),
        ])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningResponse {
    pub status: ResponseStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: OutputData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<BuildErrorKind>,
}

impl ProvisioningResponse {
    pub fn success(
        physical_id: impl Into<String>,
        reason: impl Into<String>,
        data: OutputData,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: reason.into(),
            physical_resource_id: Some(physical_id.into()),
            data,
            error_kind: None,
        }
    }

    pub fn failed(
        physical_id: Option<String>,
        reason: impl Into<String>,
        error_kind: BuildErrorKind,
    ) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: reason.into(),
            physical_resource_id: physical_id,
            data: OutputData::new(),
            error_kind: Some(error_kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Answer to one isComplete poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionResponse {
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: OutputData,
}
