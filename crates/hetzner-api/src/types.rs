use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Floating IPs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FloatingIp {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub ip: String,
    #[serde(rename = "type")]
    pub ip_type: IpType,
    /// Server the IP is currently assigned to.
    #[serde(default)]
    pub server: Option<i64>,
    pub home_location: Location,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateFloatingIpRequest {
    #[serde(rename = "type")]
    pub ip_type: IpType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AssignFloatingIpRequest {
    pub server: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FloatingIpResponse {
    pub floating_ip: FloatingIp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateFloatingIpResponse {
    pub floating_ip: FloatingIp,
    #[serde(default)]
    pub action: Option<Action>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListFloatingIpsResponse {
    pub floating_ips: Vec<FloatingIp>,
}

// ── Servers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub status: ServerStatus,
    pub server_type: ServerType,
    #[serde(default)]
    pub image: Option<Image>,
    pub public_net: PublicNet,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerType {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicNet {
    #[serde(default)]
    pub ipv4: Option<Ipv4>,
    /// IDs of floating IPs assigned to the server.
    #[serde(default)]
    pub floating_ips: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ipv4 {
    pub ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_after_create: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerResponse {
    pub server: Server,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateServerResponse {
    pub server: Server,
    #[serde(default)]
    pub action: Option<Action>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListServersResponse {
    pub servers: Vec<Server>,
}

// ── Load balancers ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancer {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub public_net: Option<LoadBalancerPublicNet>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancerPublicNet {
    #[serde(default)]
    pub ipv4: Option<LoadBalancerIpv4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancerIpv4 {
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub load_balancer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Algorithm {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddTargetRequest {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_private_ip: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Server,
    LabelSelector,
    Ip,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSelector {
    pub selector: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddServiceRequest {
    pub protocol: ServiceProtocol,
    pub listen_port: u16,
    pub destination_port: u16,
    pub proxyprotocol: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceProtocol {
    Tcp,
    Http,
    Https,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub protocol: ServiceProtocol,
    pub port: u16,
    pub interval: u32,
    pub timeout: u32,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HealthCheckHttp>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckHttp {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateLoadBalancerResponse {
    pub load_balancer: LoadBalancer,
    #[serde(default)]
    pub action: Option<Action>,
}

// ── Actions ──────────────────────────────────────────────────────────

/// Asynchronous operation tracked by the API (assign, unassign, create...).
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    pub id: i64,
    pub command: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionResponse {
    pub action: Action,
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ApiErrorBody,
}
