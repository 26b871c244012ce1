//! Exchange floating IPs between two instances (staging ↔ production).
//!
//! The IP each side receives is resolved from the *role* label of the other
//! side (`stagingEip`, `prodEip`), not from what was detached. When labels
//! and live associations have drifted apart the swap follows the labels, so
//! drift is detected up front and either logged or refused.
//!
//! The swap is not atomic. Completed steps are recorded in a [`SwapReport`]
//! and returned inside [`Error::SwapIncomplete`] when a later step fails.

use std::fmt;

use tracing::{debug, info, warn};

use crate::types::{AllocationId, FloatingIp, Instance, InstanceId, Lookup};
use crate::{CloudProvider, Error, ResourceKind, Result, attach, validate_name};

pub const STAGING_INSTANCE: &str = "staging-instance";
pub const STAGING_IP: &str = "stagingEip";
pub const PRODUCTION_INSTANCE: &str = "production-instance";
pub const PRODUCTION_IP: &str = "prodEip";

/// One side of a swap: the instance label and the label of its role IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapSide {
    pub instance: String,
    pub floating_ip: String,
}

/// What to do when an instance does not hold the IP its role label names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriftPolicy {
    /// Log it, record it in the report and swap by label anyway.
    #[default]
    Warn,
    /// Fail with [`Error::TagDrift`] before anything is changed.
    Refuse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub a: SwapSide,
    pub b: SwapSide,
    pub drift: DriftPolicy,
}

impl SwapPlan {
    pub fn new(
        instance_a: impl Into<String>,
        ip_a: impl Into<String>,
        instance_b: impl Into<String>,
        ip_b: impl Into<String>,
    ) -> Self {
        Self {
            a: SwapSide {
                instance: instance_a.into(),
                floating_ip: ip_a.into(),
            },
            b: SwapSide {
                instance: instance_b.into(),
                floating_ip: ip_b.into(),
            },
            drift: DriftPolicy::default(),
        }
    }

    pub fn staging_production() -> Self {
        Self::new(STAGING_INSTANCE, STAGING_IP, PRODUCTION_INSTANCE, PRODUCTION_IP)
    }

    pub fn with_drift_policy(mut self, drift: DriftPolicy) -> Self {
        self.drift = drift;
        self
    }

    fn validate(&self) -> Result<()> {
        for name in [
            &self.a.instance,
            &self.a.floating_ip,
            &self.b.instance,
            &self.b.floating_ip,
        ] {
            validate_name(name)?;
        }
        if self.a.instance == self.b.instance {
            return Err(Error::InvalidName(format!(
                "cannot swap instance '{}' with itself",
                self.a.instance
            )));
        }
        if self.a.floating_ip == self.b.floating_ip {
            return Err(Error::InvalidName(format!(
                "both sides use floating ip '{}'",
                self.a.floating_ip
            )));
        }
        Ok(())
    }
}

/// A mutation the swap has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapStep {
    Detached {
        instance: InstanceId,
        allocation: AllocationId,
    },
    Attached {
        instance: InstanceId,
        allocation: AllocationId,
    },
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached {
                instance,
                allocation,
            } => write!(f, "detached {allocation} from {instance}"),
            Self::Attached {
                instance,
                allocation,
            } => write!(f, "attached {allocation} to {instance}"),
        }
    }
}

/// An instance whose live floating IP differs from its role label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub instance: String,
    pub role: String,
    pub expected: AllocationId,
    pub actual: Option<AllocationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReport {
    pub steps: Vec<SwapStep>,
    pub drift: Vec<Drift>,
}

impl fmt::Display for SwapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("no changes");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

async fn resolve_instance(provider: &dyn CloudProvider, name: &str) -> Result<Instance> {
    match provider.find_instance_by_tag(name).await? {
        Lookup::Found(instance) => Ok(instance),
        Lookup::NotFound => Err(Error::LookupNotFound {
            resource: ResourceKind::Instance,
            key: name.to_string(),
        }),
    }
}

async fn resolve_role_ip(provider: &dyn CloudProvider, role: &str) -> Result<FloatingIp> {
    match provider.find_floating_ip_by_tag(role).await? {
        Lookup::Found(ip) => Ok(ip),
        Lookup::NotFound => Err(Error::LookupNotFound {
            resource: ResourceKind::FloatingIp,
            key: role.to_string(),
        }),
    }
}

/// Wrap a failure so that already completed steps are not lost.
fn incomplete(report: SwapReport, source: Error) -> Error {
    if report.steps.is_empty() {
        return source;
    }
    Error::SwapIncomplete {
        report,
        source: Box::new(source),
    }
}

/// Swap the floating IPs of the two instances named in `plan`.
///
/// Both instances and both role IPs must resolve to exactly one resource
/// before anything is detached.
pub async fn swap_floating_ips(provider: &dyn CloudProvider, plan: &SwapPlan) -> Result<SwapReport> {
    plan.validate()?;
    info!(
        a = %plan.a.instance,
        b = %plan.b.instance,
        provider = provider.name(),
        "swapping floating ips"
    );

    let (instance_a, instance_b) = tokio::try_join!(
        resolve_instance(provider, &plan.a.instance),
        resolve_instance(provider, &plan.b.instance),
    )?;
    let (mut ip_a, mut ip_b) = tokio::try_join!(
        resolve_role_ip(provider, &plan.a.floating_ip),
        resolve_role_ip(provider, &plan.b.floating_ip),
    )?;
    let (current_a, current_b) = tokio::try_join!(
        provider.find_floating_ip_by_instance(&instance_a.id),
        provider.find_floating_ip_by_instance(&instance_b.id),
    )?;

    // A role IP held by a third instance cannot be attached without taking
    // it away from that instance.
    for ip in [&ip_a, &ip_b] {
        if let Some(owner) = ip
            .instance
            .as_ref()
            .filter(|owner| **owner != instance_a.id && **owner != instance_b.id)
        {
            let target = if ip.allocation == ip_a.allocation {
                &instance_b.id
            } else {
                &instance_a.id
            };
            return Err(Error::AlreadyAssociated {
                instance: target.clone(),
                allocation: ip.allocation.clone(),
                reason: format!("floating ip '{}' is held by instance {owner}", ip.name),
            });
        }
    }

    let mut report = SwapReport::default();
    for (side, ip, current) in [
        (&plan.a, &ip_a, &current_a),
        (&plan.b, &ip_b, &current_b),
    ] {
        let actual = current.as_ref().map(|c| c.allocation.clone());
        if actual.as_ref() == Some(&ip.allocation) {
            continue;
        }
        let drift = Drift {
            instance: side.instance.clone(),
            role: side.floating_ip.clone(),
            expected: ip.allocation.clone(),
            actual,
        };
        if plan.drift == DriftPolicy::Refuse {
            return Err(Error::TagDrift {
                instance: drift.instance,
                role: drift.role,
                expected: drift.expected,
                actual: drift.actual,
            });
        }
        warn!(
            instance = %drift.instance,
            role = %drift.role,
            expected = %drift.expected,
            actual = ?drift.actual,
            "floating ip labels drifted from live associations, swapping by label"
        );
        report.drift.push(drift);
    }

    for (instance, current) in [(&instance_a, current_a), (&instance_b, current_b)] {
        let Some(current) = current else {
            debug!(instance = %instance.id, "no floating ip attached, nothing to detach");
            continue;
        };
        if let Err(e) = provider.disassociate(&current.allocation).await {
            return Err(incomplete(report, e));
        }
        info!(
            instance = %instance.id,
            allocation = %current.allocation,
            "floating ip detached"
        );
        for ip in [&mut ip_a, &mut ip_b] {
            if ip.allocation == current.allocation {
                ip.instance = None;
            }
        }
        report.steps.push(SwapStep::Detached {
            instance: instance.id.clone(),
            allocation: current.allocation,
        });
    }

    for (instance, ip) in [(&instance_a, &ip_b), (&instance_b, &ip_a)] {
        if let Err(e) = attach(provider, &instance.id, ip).await {
            warn!(
                instance = %instance.id,
                allocation = %ip.allocation,
                completed = %report,
                "swap stopped part way"
            );
            return Err(incomplete(report, e));
        }
        report.steps.push(SwapStep::Attached {
            instance: instance.id.clone(),
            allocation: ip.allocation.clone(),
        });
    }

    info!(steps = report.steps.len(), "floating ips swapped");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProvider, Operation};

    struct Fixture {
        provider: MemoryProvider,
        staging: InstanceId,
        production: InstanceId,
    }

    /// staging-instance holds eip-111 (stagingEip), production-instance holds eip-222 (prodEip).
    fn fixture() -> Fixture {
        let provider = MemoryProvider::new();
        let staging = provider.add_instance(STAGING_INSTANCE);
        let production = provider.add_instance(PRODUCTION_INSTANCE);
        provider.add_floating_ip("eip-111", STAGING_IP, Some(&staging));
        provider.add_floating_ip("eip-222", PRODUCTION_IP, Some(&production));
        Fixture {
            provider,
            staging,
            production,
        }
    }

    fn alloc(id: &str) -> Option<AllocationId> {
        Some(AllocationId(id.into()))
    }

    #[tokio::test]
    async fn swaps_staging_and_production() {
        let f = fixture();

        let report = swap_floating_ips(&f.provider, &SwapPlan::staging_production())
            .await
            .unwrap();

        assert_eq!(f.provider.allocation_of(&f.staging), alloc("eip-222"));
        assert_eq!(f.provider.allocation_of(&f.production), alloc("eip-111"));
        assert!(report.drift.is_empty());
        assert_eq!(
            report.steps,
            vec![
                SwapStep::Detached {
                    instance: f.staging.clone(),
                    allocation: AllocationId("eip-111".into()),
                },
                SwapStep::Detached {
                    instance: f.production.clone(),
                    allocation: AllocationId("eip-222".into()),
                },
                SwapStep::Attached {
                    instance: f.staging.clone(),
                    allocation: AllocationId("eip-222".into()),
                },
                SwapStep::Attached {
                    instance: f.production.clone(),
                    allocation: AllocationId("eip-111".into()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn second_swap_follows_labels_not_live_state() {
        let f = fixture();
        let plan = SwapPlan::staging_production();

        swap_floating_ips(&f.provider, &plan).await.unwrap();
        // Labels now disagree with live associations; the second swap follows labels.
        let report = swap_floating_ips(&f.provider, &plan).await.unwrap();

        assert_eq!(report.drift.len(), 2);
        assert_eq!(f.provider.allocation_of(&f.staging), alloc("eip-222"));
        assert_eq!(f.provider.allocation_of(&f.production), alloc("eip-111"));
    }

    #[tokio::test]
    async fn ambiguous_instance_aborts_before_mutation() {
        let f = fixture();
        f.provider.add_instance(STAGING_INSTANCE);

        let err = swap_floating_ips(&f.provider, &SwapPlan::staging_production())
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                Error::LookupAmbiguous {
                    resource: ResourceKind::Instance,
                    matches: 2,
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(f.provider.calls(Operation::Disassociate), 0);
        assert_eq!(f.provider.calls(Operation::Associate), 0);
    }

    #[tokio::test]
    async fn missing_instance_is_a_lookup_error() {
        let provider = MemoryProvider::new();
        provider.add_instance(STAGING_INSTANCE);

        let err = swap_floating_ips(&provider, &SwapPlan::staging_production())
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::LookupNotFound { resource: ResourceKind::Instance, ref key } if key == PRODUCTION_INSTANCE),
            "{err}"
        );
        assert_eq!(provider.mutations(), 0);
    }

    #[tokio::test]
    async fn detaching_bare_instance_is_a_no_op() {
        let provider = MemoryProvider::new();
        let staging = provider.add_instance(STAGING_INSTANCE);
        let production = provider.add_instance(PRODUCTION_INSTANCE);
        provider.add_floating_ip("eip-111", STAGING_IP, None);
        provider.add_floating_ip("eip-222", PRODUCTION_IP, Some(&production));

        let report = swap_floating_ips(&provider, &SwapPlan::staging_production())
            .await
            .unwrap();

        assert_eq!(provider.calls(Operation::Disassociate), 1);
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.drift[0].actual, None);
        assert_eq!(provider.allocation_of(&staging), alloc("eip-222"));
        assert_eq!(provider.allocation_of(&production), alloc("eip-111"));
    }

    #[tokio::test]
    async fn failed_attach_reports_partial_state() {
        let f = fixture();
        f.provider.fail_next(Operation::Associate, "rate limited");

        let err = swap_floating_ips(&f.provider, &SwapPlan::staging_production())
            .await
            .unwrap_err();

        let Error::SwapIncomplete { report, source } = err else {
            panic!("expected SwapIncomplete");
        };
        assert_eq!(report.steps.len(), 2);
        assert!(
            report
                .steps
                .iter()
                .all(|s| matches!(s, SwapStep::Detached { .. }))
        );
        assert!(matches!(*source, Error::Provider { operation: "associate", .. }));
        assert_eq!(f.provider.allocation_of(&f.staging), None);
        assert_eq!(f.provider.allocation_of(&f.production), None);
    }

    #[tokio::test]
    async fn first_detach_failure_is_returned_unwrapped() {
        let f = fixture();
        f.provider.fail_next(Operation::Disassociate, "timeout");

        let err = swap_floating_ips(&f.provider, &SwapPlan::staging_production())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Provider { operation: "disassociate", .. }), "{err}");
        assert_eq!(f.provider.allocation_of(&f.staging), alloc("eip-111"));
    }

    #[tokio::test]
    async fn second_detach_failure_reports_first_detach() {
        let f = fixture();
        f.provider.fail_nth(Operation::Disassociate, 2, "conflict");

        let err = swap_floating_ips(&f.provider, &SwapPlan::staging_production())
            .await
            .unwrap_err();

        let Error::SwapIncomplete { report, source } = err else {
            panic!("expected SwapIncomplete");
        };
        assert_eq!(
            report.steps,
            vec![SwapStep::Detached {
                instance: f.staging.clone(),
                allocation: AllocationId("eip-111".into()),
            }]
        );
        assert!(matches!(*source, Error::Provider { operation: "disassociate", .. }));
        assert_eq!(f.provider.allocation_of(&f.staging), None);
        assert_eq!(f.provider.allocation_of(&f.production), alloc("eip-222"));
        assert_eq!(f.provider.calls(Operation::Associate), 0);
    }

    #[tokio::test]
    async fn refuse_policy_rejects_drift_without_mutation() {
        let provider = MemoryProvider::new();
        let staging = provider.add_instance(STAGING_INSTANCE);
        let production = provider.add_instance(PRODUCTION_INSTANCE);
        // Labels swapped relative to the live associations.
        provider.add_floating_ip("eip-111", STAGING_IP, Some(&production));
        provider.add_floating_ip("eip-222", PRODUCTION_IP, Some(&staging));

        let plan = SwapPlan::staging_production().with_drift_policy(DriftPolicy::Refuse);
        let err = swap_floating_ips(&provider, &plan).await.unwrap_err();

        assert!(
            matches!(err, Error::TagDrift { ref instance, ref actual, .. }
                if instance == STAGING_INSTANCE && *actual == alloc("eip-222")),
            "{err}"
        );
        assert_eq!(provider.mutations(), 0);
    }

    #[tokio::test]
    async fn role_ip_held_elsewhere_is_rejected_before_mutation() {
        let f = fixture();
        let other = f.provider.add_instance("canary");
        f.provider.add_floating_ip("eip-333", "canaryEip", Some(&other));

        let plan = SwapPlan::new(STAGING_INSTANCE, "canaryEip", PRODUCTION_INSTANCE, PRODUCTION_IP);
        let err = swap_floating_ips(&f.provider, &plan).await.unwrap_err();

        assert!(matches!(err, Error::AlreadyAssociated { .. }), "{err}");
        assert_eq!(f.provider.mutations(), 0);
    }

    #[tokio::test]
    async fn plan_rejects_self_swap() {
        let provider = MemoryProvider::new();
        let plan = SwapPlan::new("web", "webEip", "web", "otherEip");

        let err = swap_floating_ips(&provider, &plan).await.unwrap_err();

        assert!(matches!(err, Error::InvalidName(_)));
        assert_eq!(provider.calls(Operation::FindInstanceByTag), 0);
    }

    #[test]
    fn report_display_lists_steps() {
        let report = SwapReport {
            steps: vec![SwapStep::Attached {
                instance: InstanceId("7".into()),
                allocation: AllocationId("eip-1".into()),
            }],
            drift: Vec::new(),
        };
        assert_eq!(report.to_string(), "attached eip-1 to 7");
        assert_eq!(SwapReport::default().to_string(), "no changes");
    }
}
