mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fip_infra::types::InstanceSpec;
use fip_infra::{WebStackSpec, deploy_web_stack, ensure_floating_ip};

use crate::cli::{Cli, Command, swap_plan};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let provider = fip_infra::build_provider().context("failed to configure cloud provider")?;
    let provider = provider.as_ref();

    match &cli.command {
        Command::EnsureIp { name } => {
            let ip = ensure_floating_ip(provider, name)
                .await
                .with_context(|| format!("ensuring floating ip '{name}'"))?;
            println!("{}\t{}", ip.allocation, ip.address);
        }
        Command::Provision { name, image, size } => {
            let spec = InstanceSpec {
                name: name.clone(),
                image: image.clone(),
                size: size.clone(),
            };
            let (instance, ip) = fip_infra::provision_instance_with_floating_ip(provider, &spec)
                .await
                .with_context(|| format!("provisioning instance '{name}'"))?;
            println!("instance\t{}", instance.id);
            println!("publicIp\t{}", ip.address);
        }
        Command::Swap {
            a_instance,
            a_ip,
            b_instance,
            b_ip,
            refuse_drift,
        } => {
            let plan = swap_plan(a_instance, a_ip, b_instance, b_ip, *refuse_drift);
            let report = fip_infra::swap_floating_ips(provider, &plan)
                .await
                .with_context(|| {
                    format!(
                        "swapping floating ips of '{}' and '{}'",
                        plan.a.instance, plan.b.instance
                    )
                })?;
            for drift in &report.drift {
                println!(
                    "drift\t{}\texpected {}\tfound {}",
                    drift.instance,
                    drift.expected,
                    drift
                        .actual
                        .as_ref()
                        .map_or_else(|| "none".to_string(), ToString::to_string)
                );
            }
            for step in &report.steps {
                println!("{step}");
            }
        }
        Command::Stack {
            name,
            target_label,
            target_port,
            health_path,
        } => {
            let spec = WebStackSpec::http(name, target_label, *target_port, health_path);
            let stack = deploy_web_stack(provider, &spec)
                .await
                .with_context(|| format!("deploying load balancer '{name}'"))?;
            println!("loadBalancer\t{}", stack.load_balancer.id);
            if let Some(address) = &stack.load_balancer.address {
                println!("address\t{address}");
            }
            println!("targets\t{}", stack.target_group.selector);
        }
    }

    Ok(())
}
