use std::collections::HashMap;

use async_trait::async_trait;
use hetzner_api::{
    AddServiceRequest, AddTargetRequest, Algorithm, CreateFloatingIpRequest,
    CreateLoadBalancerRequest, CreateServerRequest, HealthCheckHttp, HetznerClient, IpType,
    LabelSelector, ServiceProtocol, TargetKind,
};
use tracing::{debug, info};

use crate::types::{
    AllocationId, Association, FloatingIp, Instance, InstanceId, InstanceSpec, Listener,
    ListenerSpec, LoadBalancer, LoadBalancerId, LoadBalancerSpec, Lookup, NAME_LABEL, Protocol,
    TargetGroup, TargetGroupSpec, name_selector,
};
use crate::{CloudProvider, Error, ResourceKind, Result, validate_name};

/// Hetzner Cloud provider.
///
/// All configuration is loaded from environment variables via `from_env()`.
pub struct HetznerProvider {
    client: HetznerClient,
    location: String,
    load_balancer_type: String,
}

impl HetznerProvider {
    /// Create from env vars:
    ///
    /// - `HETZNER_API_TOKEN` (required)
    /// - `HETZNER_LOCATION` (default: `"fsn1"`)
    /// - `HETZNER_API_URL` (optional, API root override)
    /// - `HETZNER_LOAD_BALANCER_TYPE` (default: `"lb11"`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("HETZNER_API_TOKEN")
            .map_err(|_| Error::MissingEnv("HETZNER_API_TOKEN".into()))?;

        let client = match std::env::var("HETZNER_API_URL") {
            Ok(url) => HetznerClient::with_base_url(token, url)?,
            Err(_) => HetznerClient::new(token)?,
        };

        let location = std::env::var("HETZNER_LOCATION").unwrap_or_else(|_| "fsn1".into());
        let load_balancer_type =
            std::env::var("HETZNER_LOAD_BALANCER_TYPE").unwrap_or_else(|_| "lb11".into());

        Ok(Self::new(client, location, load_balancer_type))
    }

    pub fn new(
        client: HetznerClient,
        location: impl Into<String>,
        load_balancer_type: impl Into<String>,
    ) -> Self {
        Self {
            client,
            location: location.into(),
            load_balancer_type: load_balancer_type.into(),
        }
    }

    fn parse_id(raw: &str) -> Result<i64> {
        raw.parse::<i64>()
            .map_err(|_| Error::InvalidId(raw.to_string()))
    }

    fn labels(name: &str) -> HashMap<String, String> {
        HashMap::from([(NAME_LABEL.to_string(), name.to_string())])
    }

    fn to_floating_ip(ip: hetzner_api::FloatingIp) -> FloatingIp {
        let name = ip.labels.get(NAME_LABEL).cloned().unwrap_or(ip.name);
        FloatingIp {
            allocation: AllocationId(ip.id.to_string()),
            name,
            address: ip.ip,
            instance: ip.server.map(|id| InstanceId(id.to_string())),
        }
    }

    fn to_instance(server: hetzner_api::Server) -> Instance {
        let name = server
            .labels
            .get(NAME_LABEL)
            .cloned()
            .unwrap_or(server.name);
        Instance {
            id: InstanceId(server.id.to_string()),
            name,
            image: server
                .image
                .and_then(|image| image.name)
                .unwrap_or_default(),
            size: server.server_type.name,
            public_ipv4: server.public_net.ipv4.map(|v4| v4.ip),
        }
    }

    fn service_protocol(protocol: Protocol) -> ServiceProtocol {
        match protocol {
            Protocol::Tcp => ServiceProtocol::Tcp,
            Protocol::Http => ServiceProtocol::Http,
        }
    }

    fn unique<T>(mut matches: Vec<T>, resource: ResourceKind, key: &str) -> Result<Lookup<T>> {
        match matches.len() {
            0 => Ok(Lookup::NotFound),
            1 => Ok(Lookup::Found(matches.remove(0))),
            n => Err(Error::LookupAmbiguous {
                resource,
                key: key.to_string(),
                matches: n,
            }),
        }
    }
}

#[async_trait]
impl CloudProvider for HetznerProvider {
    async fn find_floating_ip_by_tag(&self, name: &str) -> Result<Lookup<FloatingIp>> {
        let ips = self
            .client
            .list_floating_ips(Some(&name_selector(name)))
            .await?;
        debug!(name, matches = ips.len(), "hetzner: floating ip lookup");

        let ips: Vec<FloatingIp> = ips.into_iter().map(Self::to_floating_ip).collect();
        Self::unique(ips, ResourceKind::FloatingIp, name)
    }

    async fn create_floating_ip(&self, name: &str) -> Result<FloatingIp> {
        let ip = self
            .client
            .create_floating_ip(&CreateFloatingIpRequest {
                ip_type: IpType::Ipv4,
                home_location: Some(self.location.clone()),
                name: Some(name.to_string()),
                description: None,
                labels: Self::labels(name),
            })
            .await?;

        info!(floating_ip_id = ip.id, ip = %ip.ip, "hetzner: floating ip created");
        Ok(Self::to_floating_ip(ip))
    }

    async fn find_instance_by_tag(&self, name: &str) -> Result<Lookup<Instance>> {
        let servers = self.client.list_servers(Some(&name_selector(name))).await?;
        debug!(name, matches = servers.len(), "hetzner: server lookup");

        let servers: Vec<Instance> = servers.into_iter().map(Self::to_instance).collect();
        Self::unique(servers, ResourceKind::Instance, name)
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let server = self
            .client
            .create_server(&CreateServerRequest {
                name: spec.name.clone(),
                server_type: spec.size.clone(),
                image: spec.image.clone(),
                location: Some(self.location.clone()),
                labels: Self::labels(&spec.name),
                start_after_create: Some(true),
            })
            .await?;

        info!(server_id = server.id, "hetzner: server created");
        Ok(Self::to_instance(server))
    }

    async fn find_floating_ip_by_instance(&self, id: &InstanceId) -> Result<Option<FloatingIp>> {
        let server_id = Self::parse_id(&id.0)?;

        let server = match self.client.get_server(server_id).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                return Err(Error::LookupNotFound {
                    resource: ResourceKind::Instance,
                    key: id.0.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match server.public_net.floating_ips.as_slice() {
            [] => Ok(None),
            [floating_ip_id] => {
                let ip = self.client.get_floating_ip(*floating_ip_id).await?;
                Ok(Some(Self::to_floating_ip(ip)))
            }
            many => Err(Error::LookupAmbiguous {
                resource: ResourceKind::FloatingIp,
                key: format!("server {server_id}"),
                matches: many.len(),
            }),
        }
    }

    async fn associate(
        &self,
        instance: &InstanceId,
        allocation: &AllocationId,
    ) -> Result<Association> {
        let server_id = Self::parse_id(&instance.0)?;
        let floating_ip_id = Self::parse_id(&allocation.0)?;

        self.client
            .assign_floating_ip(floating_ip_id, server_id)
            .await?;

        info!(floating_ip_id, server_id, "hetzner: floating ip assigned");
        Ok(Association {
            instance: instance.clone(),
            allocation: allocation.clone(),
        })
    }

    async fn disassociate(&self, allocation: &AllocationId) -> Result<()> {
        let floating_ip_id = Self::parse_id(&allocation.0)?;

        self.client.unassign_floating_ip(floating_ip_id).await?;

        info!(floating_ip_id, "hetzner: floating ip unassigned");
        Ok(())
    }

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancer> {
        let lb = self
            .client
            .create_load_balancer(&CreateLoadBalancerRequest {
                name: spec.name.clone(),
                load_balancer_type: self.load_balancer_type.clone(),
                location: Some(self.location.clone()),
                algorithm: Some(Algorithm {
                    kind: "round_robin".into(),
                }),
                labels: Self::labels(&spec.name),
            })
            .await?;

        info!(load_balancer_id = lb.id, "hetzner: load balancer created");
        Ok(LoadBalancer {
            id: LoadBalancerId(lb.id.to_string()),
            name: lb.name,
            address: lb.public_net.and_then(|net| net.ipv4).and_then(|v4| v4.ip),
        })
    }

    /// Hetzner has no target group resource: the group becomes a label
    /// selector target plus the health check of the listener using it.
    async fn create_target_group(&self, spec: &TargetGroupSpec) -> Result<TargetGroup> {
        validate_name(&spec.target_label)?;
        Ok(TargetGroup {
            name: spec.name.clone(),
            selector: name_selector(&spec.target_label),
            port: spec.port,
            health_check: spec.health_check.clone(),
        })
    }

    async fn attach_target_group(&self, lb: &LoadBalancerId, group: &TargetGroup) -> Result<()> {
        let lb_id = Self::parse_id(&lb.0)?;

        self.client
            .add_load_balancer_target(
                lb_id,
                &AddTargetRequest {
                    kind: TargetKind::LabelSelector,
                    label_selector: Some(LabelSelector {
                        selector: group.selector.clone(),
                    }),
                    use_private_ip: None,
                },
            )
            .await?;

        info!(load_balancer_id = lb_id, selector = %group.selector, "hetzner: target added");
        Ok(())
    }

    async fn create_listener(
        &self,
        lb: &LoadBalancerId,
        group: &TargetGroup,
        spec: &ListenerSpec,
    ) -> Result<Listener> {
        let lb_id = Self::parse_id(&lb.0)?;
        let check = &group.health_check;

        self.client
            .add_load_balancer_service(
                lb_id,
                &AddServiceRequest {
                    protocol: Self::service_protocol(spec.protocol),
                    listen_port: spec.port,
                    destination_port: group.port,
                    proxyprotocol: false,
                    health_check: Some(hetzner_api::HealthCheck {
                        protocol: Self::service_protocol(check.protocol),
                        port: check.port,
                        interval: check.interval_secs,
                        timeout: check.timeout_secs,
                        retries: check.retries,
                        http: match check.protocol {
                            Protocol::Http => Some(HealthCheckHttp {
                                path: check.http_path.clone().unwrap_or_else(|| "/".into()),
                            }),
                            Protocol::Tcp => None,
                        },
                    }),
                },
            )
            .await?;

        info!(
            load_balancer_id = lb_id,
            listen_port = spec.port,
            destination_port = group.port,
            "hetzner: service added"
        );
        Ok(Listener {
            load_balancer: lb.clone(),
            protocol: spec.protocol,
            port: spec.port,
            target_port: group.port,
        })
    }

    fn name(&self) -> &'static str {
        "hetzner"
    }
}
