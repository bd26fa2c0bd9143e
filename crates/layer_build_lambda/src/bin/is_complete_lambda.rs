use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use layer_build_core::contract::CompletionResponse;
use layer_build_lambda::adapters::s3_store::S3ArtifactStore;
use layer_build_lambda::config::LayerBuildConfig;
use layer_build_lambda::handlers::provisioning::{handle_completion_check, ProvisioningContext};
use layer_build_lambda::telemetry::init_tracing;
use serde_json::Value;

const S3_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

async fn handle_request(
    event: LambdaEvent<Value>,
    ctx: &ProvisioningContext,
    store: &S3ArtifactStore,
) -> Result<CompletionResponse, Error> {
    handle_completion_check(event.payload, ctx, store)
        .into_response()
        .map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    let config = LayerBuildConfig::from_env()?;
    // Completion checks never build, so the budget is only carried along.
    let ctx = ProvisioningContext::from_config(&config, config.build_timeout);

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(S3_OPERATION_TIMEOUT)
                .build(),
        )
        .load()
        .await;
    let store = S3ArtifactStore::new(aws_sdk_s3::Client::new(&aws_config));

    lambda_runtime::run(service_fn(|event| handle_request(event, &ctx, &store))).await
}
