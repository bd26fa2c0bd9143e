use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use layer_build_core::package_spec::PackageSpec;
use layer_build_lambda::adapters::local_store::FilesystemArtifactStore;
use layer_build_lambda::config::LayerBuildConfig;
use layer_build_lambda::handlers::provisioning::ProvisioningContext;
use layer_build_lambda::registry::{declare_layers, LayerRequest};
use layer_build_lambda::telemetry::init_tracing;

#[derive(Parser)]
#[command(
    name = "layer_build_local",
    about = "Build Python Lambda layer archives into a local directory",
    long_about = "Runs the same onEvent/isComplete flow as the deployed custom resource,\n\
                  with a directory standing in for the S3 bucket."
)]
struct Cli {
    /// Layer to build as `LogicalId=spec`, e.g. `RequestsLayer=requests==2.32.3`
    #[arg(long = "package", required = true, value_parser = parse_layer_arg)]
    packages: Vec<(String, PackageSpec)>,
    /// Directory that holds one subdirectory per container
    #[arg(long, default_value = "dist/layers")]
    out_dir: PathBuf,
    /// Container (bucket) name under the output directory
    #[arg(long, env = "LAYER_BUILD_DEFAULT_BUCKET", default_value = "local-layers")]
    container: String,
    /// Build target; defaults to LAYER_BUILD_TARGET or python3.13-arm64
    #[arg(long)]
    build_target: Option<String>,
}

fn parse_layer_arg(raw: &str) -> Result<(String, PackageSpec), String> {
    let (logical_id, spec) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected LogicalId=spec, got '{raw}'"))?;
    let logical_id = logical_id.trim();
    if logical_id.is_empty() {
        return Err(format!("missing logical id in '{raw}'"));
    }
    let spec = PackageSpec::parse(spec).map_err(|error| error.to_string())?;
    Ok((logical_id.to_string(), spec))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match LayerBuildConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    let build_target = cli
        .build_target
        .unwrap_or_else(|| config.build_target.clone());
    let requests: Vec<LayerRequest> = cli
        .packages
        .into_iter()
        .map(|(logical_id, package_spec)| LayerRequest {
            logical_id,
            package_spec,
            container: cli.container.clone(),
            build_target: build_target.clone(),
        })
        .collect();

    let ctx = ProvisioningContext::from_config(&config, config.build_timeout);
    let store = FilesystemArtifactStore::new(&cli.out_dir);

    let declarations = match declare_layers(
        &requests,
        &ctx,
        &config.installer,
        &store,
        &config.completion,
        std::thread::sleep,
    ) {
        Ok(declarations) => declarations,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&declarations) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: failed to render declarations: {error}");
            ExitCode::FAILURE
        }
    }
}
