use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::types::{
    AllocationId, Association, FloatingIp, Instance, InstanceId, InstanceSpec, Listener,
    ListenerSpec, LoadBalancer, LoadBalancerId, LoadBalancerSpec, Lookup, TargetGroup,
    TargetGroupSpec, name_selector,
};
use crate::{CloudProvider, Error, ResourceKind, Result};

/// Provider capability operations, as recorded by [`MemoryProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FindFloatingIpByTag,
    CreateFloatingIp,
    FindInstanceByTag,
    CreateInstance,
    FindFloatingIpByInstance,
    Associate,
    Disassociate,
    CreateLoadBalancer,
    CreateTargetGroup,
    AttachTargetGroup,
    CreateListener,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindFloatingIpByTag => "find floating ip by tag",
            Self::CreateFloatingIp => "create floating ip",
            Self::FindInstanceByTag => "find instance by tag",
            Self::CreateInstance => "create instance",
            Self::FindFloatingIpByInstance => "find floating ip by instance",
            Self::Associate => "associate",
            Self::Disassociate => "disassociate",
            Self::CreateLoadBalancer => "create load balancer",
            Self::CreateTargetGroup => "create target group",
            Self::AttachTargetGroup => "attach target group",
            Self::CreateListener => "create listener",
        }
    }

    /// Whether the operation changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::FindFloatingIpByTag | Self::FindInstanceByTag | Self::FindFloatingIpByInstance
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct State {
    floating_ips: Vec<FloatingIp>,
    instances: Vec<Instance>,
    load_balancers: Vec<LoadBalancer>,
    attached_groups: Vec<(LoadBalancerId, TargetGroup)>,
    listeners: Vec<Listener>,
    calls: Vec<Operation>,
    /// Injected failures: calls of the operation to let through first, and the message.
    failures: HashMap<Operation, (usize, String)>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Record a call and consume an injected failure for it, if any.
    fn enter(&mut self, op: Operation) -> Result<()> {
        self.calls.push(op);
        match self.failures.remove(&op) {
            Some((0, message)) => Err(Error::Provider {
                operation: op.as_str(),
                message,
            }),
            Some((skip, message)) => {
                self.failures.insert(op, (skip - 1, message));
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-process provider holding all resources in memory.
///
/// Records every capability call and can be told to fail the next call of
/// a given operation, which makes it the test double for the procedures.
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an instance labelled `name` without recording a call.
    pub fn add_instance(&self, name: &str) -> InstanceId {
        let mut state = self.lock();
        let id = InstanceId(format!("i-{}", state.next_id()));
        state.instances.push(Instance {
            id: id.clone(),
            name: name.to_string(),
            image: "ubuntu-24.04".into(),
            size: "cx22".into(),
            public_ipv4: None,
        });
        id
    }

    /// Seed a floating IP labelled `name`, optionally associated with `instance`.
    pub fn add_floating_ip(
        &self,
        allocation: &str,
        name: &str,
        instance: Option<&InstanceId>,
    ) -> AllocationId {
        let mut state = self.lock();
        let n = state.next_id();
        let allocation = AllocationId(allocation.to_string());
        state.floating_ips.push(FloatingIp {
            allocation: allocation.clone(),
            name: name.to_string(),
            address: format!("198.51.100.{n}"),
            instance: instance.cloned(),
        });
        allocation
    }

    /// Make the next call of `op` fail with a provider error.
    pub fn fail_next(&self, op: Operation, message: impl Into<String>) {
        self.fail_nth(op, 1, message);
    }

    /// Make the `n`th upcoming call of `op` fail; earlier calls succeed.
    pub fn fail_nth(&self, op: Operation, n: usize, message: impl Into<String>) {
        self.lock()
            .failures
            .insert(op, (n.saturating_sub(1), message.into()));
    }

    /// Number of recorded calls of `op`.
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Number of recorded calls that change remote state.
    pub fn mutations(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    /// Allocation currently associated with `instance`.
    pub fn allocation_of(&self, instance: &InstanceId) -> Option<AllocationId> {
        self.lock()
            .floating_ips
            .iter()
            .find(|ip| ip.instance.as_ref() == Some(instance))
            .map(|ip| ip.allocation.clone())
    }

    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.lock().floating_ips.clone()
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.lock().instances.clone()
    }

    pub fn listeners(&self) -> Vec<Listener> {
        self.lock().listeners.clone()
    }

    pub fn attached_groups(&self) -> Vec<(LoadBalancerId, TargetGroup)> {
        self.lock().attached_groups.clone()
    }
}

fn unique<T: Clone>(
    matches: Vec<&T>,
    resource: ResourceKind,
    key: &str,
) -> Result<Lookup<T>> {
    match matches.as_slice() {
        [] => Ok(Lookup::NotFound),
        [one] => Ok(Lookup::Found((*one).clone())),
        many => Err(Error::LookupAmbiguous {
            resource,
            key: key.to_string(),
            matches: many.len(),
        }),
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    async fn find_floating_ip_by_tag(&self, name: &str) -> Result<Lookup<FloatingIp>> {
        let mut state = self.lock();
        state.enter(Operation::FindFloatingIpByTag)?;
        let matches: Vec<&FloatingIp> =
            state.floating_ips.iter().filter(|ip| ip.name == name).collect();
        unique(matches, ResourceKind::FloatingIp, name)
    }

    async fn create_floating_ip(&self, name: &str) -> Result<FloatingIp> {
        let mut state = self.lock();
        state.enter(Operation::CreateFloatingIp)?;
        let n = state.next_id();
        let ip = FloatingIp {
            allocation: AllocationId(format!("eip-{n}")),
            name: name.to_string(),
            address: format!("198.51.100.{n}"),
            instance: None,
        };
        state.floating_ips.push(ip.clone());
        Ok(ip)
    }

    async fn find_instance_by_tag(&self, name: &str) -> Result<Lookup<Instance>> {
        let mut state = self.lock();
        state.enter(Operation::FindInstanceByTag)?;
        let matches: Vec<&Instance> = state.instances.iter().filter(|i| i.name == name).collect();
        unique(matches, ResourceKind::Instance, name)
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        let mut state = self.lock();
        state.enter(Operation::CreateInstance)?;
        let n = state.next_id();
        let instance = Instance {
            id: InstanceId(format!("i-{n}")),
            name: spec.name.clone(),
            image: spec.image.clone(),
            size: spec.size.clone(),
            public_ipv4: Some(format!("192.0.2.{n}")),
        };
        state.instances.push(instance.clone());
        Ok(instance)
    }

    async fn find_floating_ip_by_instance(&self, id: &InstanceId) -> Result<Option<FloatingIp>> {
        let mut state = self.lock();
        state.enter(Operation::FindFloatingIpByInstance)?;
        let matches: Vec<&FloatingIp> = state
            .floating_ips
            .iter()
            .filter(|ip| ip.instance.as_ref() == Some(id))
            .collect();
        unique(matches, ResourceKind::FloatingIp, &format!("instance {id}"))
            .map(Lookup::into_option)
    }

    async fn associate(
        &self,
        instance: &InstanceId,
        allocation: &AllocationId,
    ) -> Result<Association> {
        let mut state = self.lock();
        state.enter(Operation::Associate)?;
        if !state.instances.iter().any(|i| &i.id == instance) {
            return Err(Error::Provider {
                operation: Operation::Associate.as_str(),
                message: format!("unknown instance {instance}"),
            });
        }
        let ip = state
            .floating_ips
            .iter_mut()
            .find(|ip| &ip.allocation == allocation)
            .ok_or_else(|| Error::Provider {
                operation: Operation::Associate.as_str(),
                message: format!("unknown floating ip {allocation}"),
            })?;
        ip.instance = Some(instance.clone());
        Ok(Association {
            instance: instance.clone(),
            allocation: allocation.clone(),
        })
    }

    async fn disassociate(&self, allocation: &AllocationId) -> Result<()> {
        let mut state = self.lock();
        state.enter(Operation::Disassociate)?;
        let ip = state
            .floating_ips
            .iter_mut()
            .find(|ip| &ip.allocation == allocation)
            .ok_or_else(|| Error::Provider {
                operation: Operation::Disassociate.as_str(),
                message: format!("unknown floating ip {allocation}"),
            })?;
        ip.instance = None;
        Ok(())
    }

    async fn create_load_balancer(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancer> {
        let mut state = self.lock();
        state.enter(Operation::CreateLoadBalancer)?;
        let n = state.next_id();
        let lb = LoadBalancer {
            id: LoadBalancerId(format!("lb-{n}")),
            name: spec.name.clone(),
            address: Some(format!("198.51.100.{n}")),
        };
        state.load_balancers.push(lb.clone());
        Ok(lb)
    }

    async fn create_target_group(&self, spec: &TargetGroupSpec) -> Result<TargetGroup> {
        self.lock().enter(Operation::CreateTargetGroup)?;
        Ok(TargetGroup {
            name: spec.name.clone(),
            selector: name_selector(&spec.target_label),
            port: spec.port,
            health_check: spec.health_check.clone(),
        })
    }

    async fn attach_target_group(&self, lb: &LoadBalancerId, group: &TargetGroup) -> Result<()> {
        let mut state = self.lock();
        state.enter(Operation::AttachTargetGroup)?;
        state.attached_groups.push((lb.clone(), group.clone()));
        Ok(())
    }

    async fn create_listener(
        &self,
        lb: &LoadBalancerId,
        group: &TargetGroup,
        spec: &ListenerSpec,
    ) -> Result<Listener> {
        let mut state = self.lock();
        state.enter(Operation::CreateListener)?;
        let listener = Listener {
            load_balancer: lb.clone(),
            protocol: spec.protocol,
            port: spec.port,
            target_port: group.port,
        };
        state.listeners.push(listener.clone());
        Ok(listener)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
