use serde::{Deserialize, Serialize};
use std::fmt;

/// Label key every managed resource is tagged with.
pub const NAME_LABEL: &str = "name";

/// Opaque provider-side compute instance identifier (e.g. a Hetzner Server ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// Opaque provider-side floating IP identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadBalancerId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LoadBalancerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a lookup that may legitimately find nothing.
///
/// Any other failure (network, permission, malformed query) is an `Err` on
/// the surrounding `Result`, never a `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(v) => Some(v),
            Self::NotFound => None,
        }
    }
}

/// Reassignable public address allocated independently of any instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub allocation: AllocationId,
    pub name: String,
    pub address: String,
    /// Instance the address is currently associated with.
    pub instance: Option<InstanceId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub image: String,
    pub size: String,
    pub public_ipv4: Option<String>,
}

/// Specification for creating a compute instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub size: String,
}

impl InstanceSpec {
    /// Name of the floating IP that belongs to this instance.
    pub fn floating_ip_name(&self) -> String {
        format!("{}-eip", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub instance: InstanceId,
    pub allocation: AllocationId,
}

// ── Load balancer stack ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Http => f.write_str("http"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadBalancerSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub protocol: Protocol,
    pub port: u16,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub retries: u32,
    /// Only used for HTTP checks.
    pub http_path: Option<String>,
}

impl HealthCheck {
    pub fn http(port: u16, path: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Http,
            port,
            interval_secs: 15,
            timeout_secs: 10,
            retries: 3,
            http_path: Some(path.into()),
        }
    }
}

/// Named set of backend instances a load balancer routes to.
#[derive(Debug, Clone)]
pub struct TargetGroupSpec {
    pub name: String,
    /// Label value matched against [`NAME_LABEL`] on instances.
    pub target_label: String,
    pub port: u16,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub name: String,
    /// Provider label selector expression, e.g. `name=web`.
    pub selector: String,
    pub port: u16,
    pub health_check: HealthCheck,
}

#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub protocol: Protocol,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub load_balancer: LoadBalancerId,
    pub protocol: Protocol,
    pub port: u16,
    pub target_port: u16,
}

/// Label selector matching resources tagged with `value`.
pub fn name_selector(value: &str) -> String {
    format!("{NAME_LABEL}={value}")
}
