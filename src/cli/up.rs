use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{HarnessConfig, parse_services};
use crate::instance::Instance;

#[derive(Args, Debug, Clone, Default)]
pub struct UpArgs {
    /// LocalStack version ("latest" or semantic version)
    #[arg(long)]
    pub version: Option<String>,

    /// Service to start; repeat for several. Starts everything when omitted
    #[arg(long = "service", value_name = "NAME")]
    pub services: Vec<String>,

    /// Container label; repeat for several
    #[arg(long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Seconds before the container tears itself down
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Connect to Docker through DOCKER_HOST and related variables
    #[arg(long)]
    pub from_env: bool,

    /// Run the upstream image instead of building the self-destructing one
    #[arg(long)]
    pub pull: bool,

    /// Print the endpoints as JSON
    #[arg(long)]
    pub json: bool,
}

/// Endpoints of a started instance, as printed by `up --json`.
#[derive(Debug, Serialize)]
struct UpReport {
    version: String,
    container_id: String,
    fixed_port: bool,
    endpoints: BTreeMap<&'static str, String>,
}

impl UpReport {
    fn from_instance(instance: &Instance) -> Self {
        Self {
            version: instance.version().to_string(),
            container_id: instance.container_id().unwrap_or_default(),
            fixed_port: instance.is_fixed_port(),
            endpoints: instance
                .endpoints()
                .keys()
                .map(|service| (service.name, instance.endpoint_v2(*service)))
                .collect(),
        }
    }
}

impl UpArgs {
    /// Overlay these flags on the environment configuration.
    fn apply(&self, mut config: HarnessConfig) -> anyhow::Result<HarnessConfig> {
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
        if !self.services.is_empty() {
            config.services = parse_services(&self.services.join(","))
                .map_err(|name| anyhow::anyhow!("unknown service {name:?}"))?;
        }
        if let Some(secs) = self.timeout_secs {
            anyhow::ensure!(secs > 0, "--timeout-secs must be at least 1");
            config.timeout_secs = secs;
        }
        config.docker_from_env |= self.from_env;
        config.pull_image |= self.pull;
        Ok(config)
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

/// Start LocalStack, print its endpoints and stop it on Ctrl-C.
pub async fn run_up_command(args: UpArgs) -> anyhow::Result<()> {
    let config = args.apply(HarnessConfig::resolve()?)?;

    let mut builder = config.builder();
    for (key, value) in &args.labels {
        builder = builder.label(key, value);
    }
    let instance = Arc::new(builder.build()?);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    instance
        .start_with_cancellation(cancel.clone(), &config.services)
        .await
        .context("failed to start LocalStack")?;

    let report = UpReport::from_instance(&instance);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "LocalStack {} is running in container {}",
            report.version, report.container_id
        );
        for (name, endpoint) in &report.endpoints {
            println!("  {name:<20} {endpoint}");
        }
    }
    tracing::info!("Press Ctrl-C to stop");

    cancel.cancelled().await;
    instance.stop().await.context("failed to stop LocalStack")?;
    Ok(())
}
