//! Declares Lambda layers backed by built artifacts.
//!
//! Each request goes through the same onEvent/isComplete pair the provider
//! framework drives in a deployed stack, so local declarations and deployed
//! ones agree on keys and output data.

use std::collections::HashSet;
use std::time::Duration;

use layer_build_core::completion::{poll_completion, CompletionPolicy, CompletionState};
use layer_build_core::contract::{
    OutputData, DATA_DESCRIPTION, DATA_OUTPUT_KEY, PROPERTY_BUILD_TARGET, PROPERTY_OUTPUT_BUCKET,
    PROPERTY_PACKAGE_NAME,
};
use layer_build_core::package_spec::PackageSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::adapters::object_store::ArtifactStore;
use crate::adapters::resolver::PackageResolver;
use crate::handlers::provisioning::{
    handle_completion_check, handle_provisioning_event, ProvisioningContext,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRequest {
    pub logical_id: String,
    pub package_spec: PackageSpec,
    pub container: String,
    pub build_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDeclaration {
    pub logical_id: String,
    pub layer_name: String,
    pub container: String,
    pub artifact_key: String,
    pub description: String,
    pub compatible_runtimes: Vec<String>,
    pub compatible_architectures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("logical id '{0}' is declared more than once")]
    DuplicateLogicalId(String),
    #[error("provisioning {logical_id} failed: {reason}")]
    ProvisioningFailed { logical_id: String, reason: String },
    #[error("completion of {logical_id} failed: {reason}")]
    CompletionFailed { logical_id: String, reason: String },
    #[error("{logical_id} completed without an output key")]
    MissingOutputKey { logical_id: String },
}

/// Builds every requested layer in order and returns one declaration per
/// request. Stops at the first failure.
pub fn declare_layers(
    requests: &[LayerRequest],
    ctx: &ProvisioningContext,
    resolver: &impl PackageResolver,
    store: &impl ArtifactStore,
    policy: &CompletionPolicy,
    mut wait: impl FnMut(Duration),
) -> Result<Vec<LayerDeclaration>, RegistryError> {
    let mut seen = HashSet::new();
    if let Some(duplicate) = requests
        .iter()
        .find(|request| !seen.insert(request.logical_id.as_str()))
    {
        return Err(RegistryError::DuplicateLogicalId(duplicate.logical_id.clone()));
    }

    let mut declarations = Vec::with_capacity(requests.len());
    for request in requests {
        let mut event = json!({
            "RequestType": "Create",
            "LogicalResourceId": request.logical_id,
            "ResourceProperties": {
                PROPERTY_PACKAGE_NAME: request.package_spec.as_str(),
                PROPERTY_OUTPUT_BUCKET: request.container,
                PROPERTY_BUILD_TARGET: request.build_target,
            }
        });

        let response = handle_provisioning_event(event.clone(), ctx, resolver, store);
        let succeeded = response.is_success();
        let physical_id = match response.physical_resource_id {
            Some(physical_id) if succeeded => physical_id,
            _ => {
                return Err(RegistryError::ProvisioningFailed {
                    logical_id: request.logical_id.clone(),
                    reason: response.reason,
                })
            }
        };

        event["PhysicalResourceId"] = json!(physical_id);
        let data = match poll_completion(
            policy,
            |_attempt| handle_completion_check(event.clone(), ctx, store),
            &mut wait,
        ) {
            CompletionState::Success(data) => data,
            CompletionState::Failed(reason) => {
                return Err(RegistryError::CompletionFailed {
                    logical_id: request.logical_id.clone(),
                    reason,
                })
            }
            CompletionState::Pending => {
                return Err(RegistryError::CompletionFailed {
                    logical_id: request.logical_id.clone(),
                    reason: "still pending".to_string(),
                })
            }
        };

        let declaration = declaration_from(request, &data)?;
        info!(
            logical_id = %declaration.logical_id,
            key = %declaration.artifact_key,
            "layer_declared"
        );
        declarations.push(declaration);
    }

    Ok(declarations)
}

fn declaration_from(
    request: &LayerRequest,
    data: &OutputData,
) -> Result<LayerDeclaration, RegistryError> {
    let artifact_key = data
        .get(DATA_OUTPUT_KEY)
        .cloned()
        .ok_or_else(|| RegistryError::MissingOutputKey {
            logical_id: request.logical_id.clone(),
        })?;
    let (runtime, architecture) = split_build_target(&request.build_target);

    Ok(LayerDeclaration {
        logical_id: request.logical_id.clone(),
        layer_name: request.logical_id.clone(),
        container: request.container.clone(),
        artifact_key,
        description: data.get(DATA_DESCRIPTION).cloned().unwrap_or_default(),
        compatible_runtimes: vec![runtime.to_string()],
        compatible_architectures: architecture.map(str::to_string).into_iter().collect(),
    })
}

/// `python3.13-arm64` → (`python3.13`, `arm64`). A target without an
/// architecture suffix is a runtime on its own.
pub fn split_build_target(build_target: &str) -> (&str, Option<&str>) {
    match build_target.rsplit_once('-') {
        Some((runtime, architecture)) if !runtime.is_empty() && !architecture.is_empty() => {
            (runtime, Some(architecture))
        }
        _ => (build_target, None),
    }
}
