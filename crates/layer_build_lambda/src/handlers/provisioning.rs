use std::time::Duration;

use layer_build_core::completion::CompletionState;
use layer_build_core::contract::{
    artifact_fingerprint, decode_event, BuildArtifact, DecodeDefaults, LayerBuildProperties,
    ProvisioningEvent, ProvisioningEventEnvelope, ProvisioningResponse,
};
use layer_build_core::error::{BuildErrorKind, DeletionError};
use layer_build_core::storage_keys::{artifact_object_key, is_owned_artifact_key};
use serde_json::Value;
use tracing::{info, warn};

use crate::adapters::object_store::ArtifactStore;
use crate::adapters::resolver::PackageResolver;
use crate::config::LayerBuildConfig;
use crate::handlers::build::{build_layer_artifact, BuildBudget, BuildRequest};
use crate::packaging::ArchiveLimits;

pub const BUILD_SUCCESS_REASON: &str = "Build success";

/// Per-invocation settings the adapter needs besides the event itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningContext {
    pub defaults: DecodeDefaults,
    pub key_prefix: String,
    pub limits: ArchiveLimits,
    pub reuse_existing: bool,
    pub budget: Duration,
}

impl ProvisioningContext {
    pub fn from_config(config: &LayerBuildConfig, budget: Duration) -> Self {
        Self {
            defaults: config.decode_defaults(),
            key_prefix: config.key_prefix.clone(),
            limits: config.limits,
            reuse_existing: config.reuse_existing,
            budget,
        }
    }
}

/// onEvent: turns one lifecycle request into exactly one response.
pub fn handle_provisioning_event(
    event: Value,
    ctx: &ProvisioningContext,
    resolver: &impl PackageResolver,
    store: &impl ArtifactStore,
) -> ProvisioningResponse {
    let envelope = match ProvisioningEventEnvelope::from_value(event) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(error = %error, "provisioning_event_rejected");
            return ProvisioningResponse::failed(
                None,
                format!("invalid provisioning event: {error}"),
                BuildErrorKind::InvalidRequest,
            );
        }
    };
    info!(
        request_type = %envelope.request_type,
        logical_id = %envelope.logical_resource_id,
        physical_id = envelope.physical_resource_id.as_deref().unwrap_or(""),
        request_id = envelope.request_id.as_deref().unwrap_or(""),
        "provisioning_event_received"
    );

    let event = match decode_event(&envelope, &ctx.defaults) {
        Ok(event) => event,
        Err(error) if envelope.request_type == "Delete" => {
            // A Delete that cannot be decoded still has to let the stack move on.
            let physical_id = envelope
                .physical_resource_id
                .clone()
                .unwrap_or_else(|| envelope.logical_resource_id.clone());
            warn!(
                logical_id = %envelope.logical_resource_id,
                physical_id = %physical_id,
                error = %error,
                "delete_event_undecodable"
            );
            return ProvisioningResponse::success(
                physical_id,
                format!("nothing to delete: {error}"),
                Default::default(),
            );
        }
        Err(error) => {
            warn!(
                logical_id = %envelope.logical_resource_id,
                error = %error,
                "provisioning_event_rejected"
            );
            return ProvisioningResponse::failed(
                envelope.physical_resource_id.clone(),
                format!("{}: {error}", envelope.logical_resource_id),
                BuildErrorKind::InvalidRequest,
            );
        }
    };

    match event {
        ProvisioningEvent::Create {
            logical_id,
            properties,
        } => build_response(&logical_id, None, &properties, ctx, resolver, store),
        ProvisioningEvent::Update {
            logical_id,
            physical_id,
            properties,
        } => build_response(
            &logical_id,
            Some(physical_id),
            &properties,
            ctx,
            resolver,
            store,
        ),
        ProvisioningEvent::Delete {
            logical_id,
            physical_id,
            output_bucket,
        } => delete_response(&logical_id, physical_id, output_bucket.as_deref(), store),
    }
}

fn build_response(
    logical_id: &str,
    prior_physical_id: Option<String>,
    properties: &LayerBuildProperties,
    ctx: &ProvisioningContext,
    resolver: &impl PackageResolver,
    store: &impl ArtifactStore,
) -> ProvisioningResponse {
    let request = BuildRequest {
        logical_id,
        package_spec: &properties.package_spec,
        build_target: &properties.build_target,
        container: &properties.output_bucket,
        key_prefix: &ctx.key_prefix,
        limits: ctx.limits,
        reuse_existing: ctx.reuse_existing,
        budget: BuildBudget::start(ctx.budget),
    };

    match build_layer_artifact(&request, resolver, store) {
        Ok(artifact) => {
            let replaced = prior_physical_id
                .as_deref()
                .filter(|prior| *prior != artifact.key);
            if let Some(prior) = replaced {
                // The provider framework issues a Delete for the old id once the stack settles.
                info!(
                    logical_id,
                    prior_physical_id = prior,
                    key = %artifact.key,
                    "physical_id_replaced"
                );
            }
            ProvisioningResponse::success(
                artifact.key.clone(),
                BUILD_SUCCESS_REASON,
                artifact.output_data(),
            )
        }
        Err(error) => ProvisioningResponse::failed(
            prior_physical_id,
            format!("{logical_id} ({}): {error}", properties.package_spec),
            error.kind(),
        ),
    }
}

fn delete_response(
    logical_id: &str,
    physical_id: String,
    output_bucket: Option<&str>,
    store: &impl ArtifactStore,
) -> ProvisioningResponse {
    let reason = match output_bucket {
        Some(container) if is_owned_artifact_key(logical_id, &physical_id) => {
            match store.delete_object(container, &physical_id) {
                Ok(()) => {
                    info!(logical_id, key = %physical_id, container, "artifact_deleted");
                    "Delete request".to_string()
                }
                Err(message) => {
                    let error = DeletionError {
                        container: container.to_string(),
                        key: physical_id.clone(),
                        message,
                    };
                    warn!(logical_id, error = %error, "artifact_delete_failed");
                    format!("Delete request; {error}")
                }
            }
        }
        Some(_) => {
            info!(logical_id, physical_id = %physical_id, "delete_skipped_foreign_key");
            "Delete request; physical id is not an artifact key of this resource".to_string()
        }
        None => {
            info!(logical_id, physical_id = %physical_id, "delete_skipped_no_bucket");
            "Delete request; no output bucket known".to_string()
        }
    };

    ProvisioningResponse::success(physical_id, reason, Default::default())
}

/// isComplete: reports whether the artifact behind the event's physical id is
/// in place.
///
/// onEvent builds and uploads synchronously before it answers, so this only
/// confirms the object is durable and matches the event. It does not track
/// builds that outlive one invocation.
pub fn handle_completion_check(
    event: Value,
    ctx: &ProvisioningContext,
    store: &impl ArtifactStore,
) -> CompletionState {
    let envelope = match ProvisioningEventEnvelope::from_value(event) {
        Ok(envelope) => envelope,
        Err(error) => return CompletionState::Failed(format!("invalid completion event: {error}")),
    };

    let (logical_id, properties) = match decode_event(&envelope, &ctx.defaults) {
        Ok(ProvisioningEvent::Delete { .. }) => return CompletionState::Success(Default::default()),
        Ok(ProvisioningEvent::Create {
            logical_id,
            properties,
        })
        | Ok(ProvisioningEvent::Update {
            logical_id,
            properties,
            ..
        }) => (logical_id, properties),
        Err(_) if envelope.request_type == "Delete" => {
            return CompletionState::Success(Default::default())
        }
        Err(error) => {
            return CompletionState::Failed(format!("{}: {error}", envelope.logical_resource_id))
        }
    };

    let Some(physical_id) = envelope
        .physical_resource_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return CompletionState::Failed(format!(
            "{logical_id}: completion check requires PhysicalResourceId"
        ));
    };

    let fingerprint = artifact_fingerprint(&properties.package_spec, &properties.build_target);
    let expected_key = artifact_object_key(
        &ctx.key_prefix,
        &logical_id,
        &properties.package_spec,
        &fingerprint,
    );
    if physical_id != expected_key {
        return CompletionState::Failed(format!(
            "{logical_id}: physical id '{physical_id}' does not match '{expected_key}'"
        ));
    }

    match store.object_size(&properties.output_bucket, physical_id, ctx.budget) {
        Ok(Some(0)) => {
            CompletionState::Failed(format!("{logical_id}: artifact '{physical_id}' is empty"))
        }
        Ok(Some(size_bytes)) => {
            let artifact = BuildArtifact {
                container: properties.output_bucket.clone(),
                key: physical_id.to_string(),
                description: BuildArtifact::describe(
                    &properties.package_spec,
                    &properties.build_target,
                ),
                fingerprint,
                size_bytes,
            };
            CompletionState::Success(artifact.output_data())
        }
        Ok(None) => CompletionState::Pending,
        Err(error) => {
            warn!(
                logical_id = %logical_id,
                key = physical_id,
                error = %error,
                "completion_lookup_failed"
            );
            CompletionState::Pending
        }
    }
}
