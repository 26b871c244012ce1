pub mod attach;
pub mod hetzner;
pub mod memory;
pub mod provision;
pub mod stack;
pub mod swap;
pub mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use swap::SwapReport;
use types::{
    AllocationId, Association, FloatingIp, Instance, InstanceId, InstanceSpec, ListenerSpec,
    LoadBalancer, LoadBalancerId, LoadBalancerSpec, Listener, Lookup, TargetGroup,
    TargetGroupSpec,
};

pub use attach::attach;
pub use provision::{ensure_floating_ip, provision_instance_with_floating_ip};
pub use stack::{WebStack, WebStackSpec, deploy_web_stack};
pub use swap::{DriftPolicy, SwapPlan, SwapSide, swap_floating_ips};

/// Kind of remote resource, used to give lookup errors context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    FloatingIp,
    Instance,
    LoadBalancer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FloatingIp => f.write_str("floating ip"),
            Self::Instance => f.write_str("instance"),
            Self::LoadBalancer => f.write_str("load balancer"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hetzner api error: {0}")]
    Hetzner(#[from] hetzner_api::Error),

    #[error("provider error during {operation}: {message}")]
    Provider {
        operation: &'static str,
        message: String,
    },

    #[error("{resource} tagged '{key}' not found")]
    LookupNotFound { resource: ResourceKind, key: String },

    #[error("{resource} tag '{key}' is ambiguous: {matches} matches, expected exactly one")]
    LookupAmbiguous {
        resource: ResourceKind,
        key: String,
        matches: usize,
    },

    #[error("floating ip {allocation} cannot be attached to instance {instance}: {reason}")]
    AlreadyAssociated {
        instance: InstanceId,
        allocation: AllocationId,
        reason: String,
    },

    #[error(
        "instance '{instance}' holds {} but its role ip '{role}' is {expected}; refusing to swap drifted tags",
        .actual.as_ref().map_or_else(|| "no floating ip".to_string(), |a| format!("floating ip {a}"))
    )]
    TagDrift {
        instance: String,
        role: String,
        expected: AllocationId,
        actual: Option<AllocationId>,
    },

    #[error(
        "provisioning '{name}' incomplete, floating ip {floating_ip} left in place{}: {source}",
        .instance.as_ref().map_or_else(String::new, |i| format!(", instance {i} created"))
    )]
    ProvisionIncomplete {
        name: String,
        floating_ip: AllocationId,
        instance: Option<InstanceId>,
        #[source]
        source: Box<Error>,
    },

    #[error("swap incomplete after [{report}]: {source}")]
    SwapIncomplete {
        report: SwapReport,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cloud capability the provisioning and swap procedures are written against.
///
/// Every managed resource carries a `name` label; "by tag" lookups match it.
/// Lookups that require a unique match fail with [`Error::LookupAmbiguous`]
/// when more than one resource carries the label.
#[async_trait]
pub trait CloudProvider: Send + Sync + 'static {
    async fn find_floating_ip_by_tag(&self, name: &str) -> Result<Lookup<FloatingIp>>;

    async fn create_floating_ip(&self, name: &str) -> Result<FloatingIp>;

    async fn find_instance_by_tag(&self, name: &str) -> Result<Lookup<Instance>>;

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance>;

    /// Floating IP currently associated with the instance, if any.
    async fn find_floating_ip_by_instance(&self, id: &InstanceId) -> Result<Option<FloatingIp>>;

    async fn associate(&self, instance: &InstanceId, allocation: &AllocationId)
    -> Result<Association>;

    async fn disassociate(&self, allocation: &AllocationId) -> Result<()>;

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancer>;

    async fn create_target_group(&self, spec: &TargetGroupSpec) -> Result<TargetGroup>;

    async fn attach_target_group(&self, lb: &LoadBalancerId, group: &TargetGroup) -> Result<()>;

    async fn create_listener(
        &self,
        lb: &LoadBalancerId,
        group: &TargetGroup,
        spec: &ListenerSpec,
    ) -> Result<Listener>;

    /// Provider identifier.
    fn name(&self) -> &'static str;
}

/// Check that `name` is usable as a label value.
///
/// Label values are at most 63 characters of ASCII alphanumerics, `-`, `_`
/// and `.`, and must start and end with an alphanumeric character.
pub fn validate_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return Err(Error::InvalidName("name must not be empty".into()));
    };
    if bytes.len() > 63 {
        return Err(Error::InvalidName(format!(
            "'{name}' is longer than 63 characters"
        )));
    }
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(Error::InvalidName(format!(
            "'{name}' must start and end with a letter or digit"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidName(format!(
            "'{name}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Check that `name` works as a server name: a label value that is also an
/// RFC 1123 hostname (no `_`, no empty or hyphen-edged dot-separated parts).
pub fn validate_instance_name(name: &str) -> Result<()> {
    validate_name(name)?;
    if name.contains('_') {
        return Err(Error::InvalidName(format!(
            "'{name}' is not a valid hostname: '_' is not allowed"
        )));
    }
    if name
        .split('.')
        .any(|part| part.is_empty() || part.starts_with('-') || part.ends_with('-'))
    {
        return Err(Error::InvalidName(format!(
            "'{name}' is not a valid hostname"
        )));
    }
    Ok(())
}

/// Build the Hetzner Cloud provider from the environment.
pub fn build_provider() -> Result<Arc<dyn CloudProvider>> {
    dotenvy::dotenv().ok();

    let provider = hetzner::HetznerProvider::from_env()?;
    tracing::info!(provider = provider.name(), "registered cloud provider");
    Ok(Arc::new(provider))
}
