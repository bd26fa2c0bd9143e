use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use layer_build_core::contract::ProvisioningResponse;
use layer_build_lambda::adapters::s3_store::S3ArtifactStore;
use layer_build_lambda::config::LayerBuildConfig;
use layer_build_lambda::handlers::provisioning::{handle_provisioning_event, ProvisioningContext};
use layer_build_lambda::telemetry::init_tracing;
use serde_json::Value;

const S3_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

async fn handle_request(
    event: LambdaEvent<Value>,
    config: &LayerBuildConfig,
    store: &S3ArtifactStore,
) -> Result<ProvisioningResponse, Error> {
    let budget = config.build_budget(
        Some(event.context.deadline),
        Utc::now().timestamp_millis().max(0) as u64,
    );
    let ctx = ProvisioningContext::from_config(config, budget);

    let response = handle_provisioning_event(event.payload, &ctx, &config.installer, store);
    if response.is_success() {
        Ok(response)
    } else {
        // The provider framework marks the resource failed from the handler error.
        Err(Error::from(response.reason))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let config = LayerBuildConfig::from_env()?;

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(S3_OPERATION_TIMEOUT)
                .build(),
        )
        .load()
        .await;
    let store = S3ArtifactStore::new(aws_sdk_s3::Client::new(&aws_config));

    lambda_runtime::run(service_fn(|event| handle_request(event, &config, &store))).await
}
