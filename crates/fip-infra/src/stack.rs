use tracing::info;

use crate::types::{
    HealthCheck, Listener, ListenerSpec, LoadBalancer, LoadBalancerSpec, Protocol, TargetGroup,
    TargetGroupSpec,
};
use crate::{CloudProvider, Result, validate_name};

/// Load balancer in front of every instance carrying a label.
#[derive(Debug, Clone)]
pub struct WebStackSpec {
    pub load_balancer: LoadBalancerSpec,
    pub target_group: TargetGroupSpec,
    pub listener: ListenerSpec,
}

impl WebStackSpec {
    /// HTTP on port 80 forwarding to `target_port` on instances labelled `target_label`.
    pub fn http(
        name: impl Into<String>,
        target_label: impl Into<String>,
        target_port: u16,
        health_path: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            load_balancer: LoadBalancerSpec { name: name.clone() },
            target_group: TargetGroupSpec {
                name: format!("{name}-targets"),
                target_label: target_label.into(),
                port: target_port,
                health_check: HealthCheck::http(target_port, health_path),
            },
            listener: ListenerSpec {
                protocol: Protocol::Http,
                port: 80,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebStack {
    pub load_balancer: LoadBalancer,
    pub target_group: TargetGroup,
    pub listener: Listener,
}

/// Declare the load balancer, its target group and its listener, in order.
///
/// Nothing is rolled back when a later call fails.
pub async fn deploy_web_stack(provider: &dyn CloudProvider, spec: &WebStackSpec) -> Result<WebStack> {
    validate_name(&spec.load_balancer.name)?;

    let load_balancer = provider.create_load_balancer(&spec.load_balancer).await?;
    let target_group = provider.create_target_group(&spec.target_group).await?;
    provider
        .attach_target_group(&load_balancer.id, &target_group)
        .await?;
    let listener = provider
        .create_listener(&load_balancer.id, &target_group, &spec.listener)
        .await?;

    info!(
        load_balancer = %load_balancer.id,
        selector = %target_group.selector,
        port = listener.port,
        "web stack deployed"
    );
    Ok(WebStack {
        load_balancer,
        target_group,
        listener,
    })
}
