//! Typed Rust client for the Hetzner Cloud API.
//!
//! Covers the subset needed for floating IP management and the load
//! balancer stack: floating IPs (list, get, create, assign, unassign),
//! servers (list, get, create), load balancers (create, add target,
//! add service) and action polling.

mod types;

use std::time::Duration;

use tracing::debug;

pub use types::*;
use types::{
    ActionResponse, AssignFloatingIpRequest, CreateFloatingIpResponse, CreateLoadBalancerResponse,
    CreateServerResponse, ErrorResponse, FloatingIpResponse, ListFloatingIpsResponse,
    ListServersResponse, ServerResponse,
};

pub const BASE_URL: &str = "https://api.hetzner.cloud/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const ACTION_POLL_INTERVAL: Duration = Duration::from_millis(500);
const ACTION_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hetzner api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("hetzner api {endpoint} returned {status} ({code}): {message}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        code: String,
        message: String,
    },

    #[error("hetzner action {command} failed ({code}): {message}")]
    Action {
        command: String,
        code: String,
        message: String,
    },

    #[error("hetzner action {command} ({id}) still running after {waited:?}")]
    ActionTimeout {
        command: String,
        id: i64,
        waited: Duration,
    },
}

impl Error {
    /// `true` if the API answered 404 for the requested resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == reqwest::StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the Hetzner Cloud REST API.
#[derive(Clone)]
pub struct HetznerClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl HetznerClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, BASE_URL)
    }

    /// Point the client at a different API root (staging endpoints, test servers).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(parsed) => (parsed.error.code, parsed.error.message),
                Err(_) => ("unknown".to_string(), body),
            };
            return Err(Error::Api {
                endpoint,
                status,
                code,
                message,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        endpoint: &'static str,
    ) -> Result<T> {
        debug!(path, "hetzner: GET");
        let resp = self
            .http
            .get(self.url(path))
            .header("Authorization", self.auth())
            .query(query)
            .send()
            .await?;

        Self::check(resp, endpoint)
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    async fn post_json<T, B>(&self, path: &str, body: &B, endpoint: &'static str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        debug!(path, "hetzner: POST");
        let resp = self
            .http
            .post(self.url(path))
            .header("Authorization", self.auth())
            .json(body)
            .send()
            .await?;

        Self::check(resp, endpoint)
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    fn selector_query(label_selector: Option<&str>) -> Vec<(&'static str, String)> {
        match label_selector {
            Some(selector) => vec![("label_selector", selector.to_string())],
            None => Vec::new(),
        }
    }

    // ── Floating IPs ─────────────────────────────────────────────────

    pub async fn list_floating_ips(&self, label_selector: Option<&str>) -> Result<Vec<FloatingIp>> {
        let resp: ListFloatingIpsResponse = self
            .get_json(
                "/floating_ips",
                &Self::selector_query(label_selector),
                "list floating ips",
            )
            .await?;
        Ok(resp.floating_ips)
    }

    pub async fn get_floating_ip(&self, id: i64) -> Result<FloatingIp> {
        let resp: FloatingIpResponse = self
            .get_json(&format!("/floating_ips/{id}"), &[], "get floating ip")
            .await?;
        Ok(resp.floating_ip)
    }

    /// Create a floating IP, waiting for the creation action when one is returned.
    pub async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> Result<FloatingIp> {
        let resp: CreateFloatingIpResponse = self
            .post_json("/floating_ips", req, "create floating ip")
            .await?;
        if let Some(action) = resp.action {
            self.wait_for_action(action).await?;
        }
        Ok(resp.floating_ip)
    }

    pub async fn assign_floating_ip(&self, id: i64, server: i64) -> Result<Action> {
        let resp: ActionResponse = self
            .post_json(
                &format!("/floating_ips/{id}/actions/assign"),
                &AssignFloatingIpRequest { server },
                "assign floating ip",
            )
            .await?;
        self.wait_for_action(resp.action).await
    }

    pub async fn unassign_floating_ip(&self, id: i64) -> Result<Action> {
        let resp: ActionResponse = self
            .post_json(
                &format!("/floating_ips/{id}/actions/unassign"),
                &serde_json::json!({}),
                "unassign floating ip",
            )
            .await?;
        self.wait_for_action(resp.action).await
    }

    // ── Servers ──────────────────────────────────────────────────────

    pub async fn list_servers(&self, label_selector: Option<&str>) -> Result<Vec<Server>> {
        let resp: ListServersResponse = self
            .get_json(
                "/servers",
                &Self::selector_query(label_selector),
                "list servers",
            )
            .await?;
        Ok(resp.servers)
    }

    pub async fn get_server(&self, id: i64) -> Result<Server> {
        let resp: ServerResponse = self
            .get_json(&format!("/servers/{id}"), &[], "get server")
            .await?;
        Ok(resp.server)
    }

    /// Create a server and wait until the create action has finished.
    pub async fn create_server(&self, req: &CreateServerRequest) -> Result<Server> {
        let resp: CreateServerResponse = self.post_json("/servers", req, "create server").await?;
        if let Some(action) = resp.action {
            self.wait_for_action(action).await?;
        }
        Ok(resp.server)
    }

    // ── Load balancers ───────────────────────────────────────────────

    pub async fn create_load_balancer(
        &self,
        req: &CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer> {
        let resp: CreateLoadBalancerResponse = self
            .post_json("/load_balancers", req, "create load balancer")
            .await?;
        if let Some(action) = resp.action {
            self.wait_for_action(action).await?;
        }
        Ok(resp.load_balancer)
    }

    pub async fn add_load_balancer_target(&self, id: i64, req: &AddTargetRequest) -> Result<Action> {
        let resp: ActionResponse = self
            .post_json(
                &format!("/load_balancers/{id}/actions/add_target"),
                req,
                "add load balancer target",
            )
            .await?;
        self.wait_for_action(resp.action).await
    }

    pub async fn add_load_balancer_service(
        &self,
        id: i64,
        req: &AddServiceRequest,
    ) -> Result<Action> {
        let resp: ActionResponse = self
            .post_json(
                &format!("/load_balancers/{id}/actions/add_service"),
                req,
                "add load balancer service",
            )
            .await?;
        self.wait_for_action(resp.action).await
    }

    // ── Actions ──────────────────────────────────────────────────────

    pub async fn get_action(&self, id: i64) -> Result<Action> {
        let resp: ActionResponse = self
            .get_json(&format!("/actions/{id}"), &[], "get action")
            .await?;
        Ok(resp.action)
    }

    /// Poll an action until it leaves the `running` state.
    ///
    /// Resources stay locked while an action on them is running, so a
    /// follow-up mutation on the same floating IP must wait for this.
    pub async fn wait_for_action(&self, mut action: Action) -> Result<Action> {
        let mut attempts = 0;
        while action.status == ActionStatus::Running {
            if attempts >= ACTION_POLL_ATTEMPTS {
                return Err(Error::ActionTimeout {
                    command: action.command,
                    id: action.id,
                    waited: ACTION_POLL_INTERVAL * ACTION_POLL_ATTEMPTS,
                });
            }
            attempts += 1;
            tokio::time::sleep(ACTION_POLL_INTERVAL).await;
            action = self.get_action(action.id).await?;
        }

        if action.status == ActionStatus::Error {
            let (code, message) = action
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| ("unknown".into(), String::new()));
            return Err(Error::Action {
                command: action.command,
                code,
                message,
            });
        }

        Ok(action)
    }
}
