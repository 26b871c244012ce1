use clap::{Parser, Subcommand};
use fip_infra::swap::{PRODUCTION_INSTANCE, PRODUCTION_IP, STAGING_INSTANCE, STAGING_IP};
use fip_infra::{DriftPolicy, SwapPlan};

/// Floating IP provisioning and staging/production swaps on Hetzner Cloud.
#[derive(Debug, Parser)]
#[command(name = "fipctl")]
#[command(about = "Provision floating IPs and swap them between instances")]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ensure a labelled floating IP exists, creating it if absent.
    EnsureIp {
        /// Label value of the floating IP.
        #[arg(long)]
        name: String,
    },

    /// Create an instance with its own floating IP (`<name>-eip`).
    Provision {
        /// Instance name and label value.
        #[arg(long)]
        name: String,

        /// Image name.
        #[arg(long, default_value = "ubuntu-24.04")]
        image: String,

        /// Server type.
        #[arg(long, default_value = "cx22")]
        size: String,
    },

    /// Swap floating IPs between two instances.
    Swap {
        /// Label of the first instance.
        #[arg(long, env = "FIP_A_INSTANCE", default_value = STAGING_INSTANCE)]
        a_instance: String,

        /// Label of the first instance's role floating IP.
        #[arg(long, env = "FIP_A_IP", default_value = STAGING_IP)]
        a_ip: String,

        /// Label of the second instance.
        #[arg(long, env = "FIP_B_INSTANCE", default_value = PRODUCTION_INSTANCE)]
        b_instance: String,

        /// Label of the second instance's role floating IP.
        #[arg(long, env = "FIP_B_IP", default_value = PRODUCTION_IP)]
        b_ip: String,

        /// Fail instead of warning when labels and live associations disagree.
        #[arg(long)]
        refuse_drift: bool,
    },

    /// Deploy a load balancer in front of labelled instances.
    Stack {
        /// Load balancer name.
        #[arg(long)]
        name: String,

        /// Instances carrying this label become targets.
        #[arg(long)]
        target_label: String,

        /// Port the targets listen on.
        #[arg(long, default_value = "80")]
        target_port: u16,

        /// HTTP health check path.
        #[arg(long, default_value = "/")]
        health_path: String,
    },
}

/// Swap plan for the `swap` subcommand's arguments.
pub fn swap_plan(
    a_instance: &str,
    a_ip: &str,
    b_instance: &str,
    b_ip: &str,
    refuse_drift: bool,
) -> SwapPlan {
    let drift = if refuse_drift {
        DriftPolicy::Refuse
    } else {
        DriftPolicy::Warn
    };
    SwapPlan::new(a_instance, a_ip, b_instance, b_ip).with_drift_policy(drift)
}
