use tracing::{debug, info, warn};

use crate::types::{FloatingIp, Instance, InstanceSpec, Lookup};
use crate::{CloudProvider, Error, Result, attach, validate_instance_name, validate_name};

/// Return the floating IP labelled `name`, creating it only if absent.
///
/// Lookup errors other than "not found" are returned unchanged and no
/// floating IP is created.
pub async fn ensure_floating_ip(provider: &dyn CloudProvider, name: &str) -> Result<FloatingIp> {
    validate_name(name)?;

    match provider.find_floating_ip_by_tag(name).await? {
        Lookup::Found(ip) => {
            debug!(name, allocation = %ip.allocation, "floating ip already exists");
            Ok(ip)
        }
        Lookup::NotFound => {
            let ip = provider.create_floating_ip(name).await?;
            info!(
                name,
                allocation = %ip.allocation,
                address = %ip.address,
                provider = provider.name(),
                "floating ip created"
            );
            Ok(ip)
        }
    }
}

/// Create an instance and give it its own floating IP (`<name>-eip`).
///
/// Floating IPs are never deleted here: when a step after the floating IP
/// exists fails, [`Error::ProvisionIncomplete`] names what was left behind.
/// Running the same provisioning again picks the floating IP up by label.
pub async fn provision_instance_with_floating_ip(
    provider: &dyn CloudProvider,
    spec: &InstanceSpec,
) -> Result<(Instance, FloatingIp)> {
    validate_instance_name(&spec.name)?;

    let ip = ensure_floating_ip(provider, &spec.floating_ip_name()).await?;

    let instance = match provider.create_instance(spec).await {
        Ok(instance) => instance,
        Err(e) => {
            warn!(
                name = %spec.name,
                allocation = %ip.allocation,
                error = %e,
                "instance creation failed, floating ip left unattached"
            );
            return Err(Error::ProvisionIncomplete {
                name: spec.name.clone(),
                floating_ip: ip.allocation,
                instance: None,
                source: Box::new(e),
            });
        }
    };
    info!(
        name = %spec.name,
        instance = %instance.id,
        image = %spec.image,
        size = %spec.size,
        "instance created"
    );

    if let Err(e) = attach(provider, &instance.id, &ip).await {
        warn!(
            name = %spec.name,
            instance = %instance.id,
            allocation = %ip.allocation,
            error = %e,
            "floating ip association failed"
        );
        return Err(Error::ProvisionIncomplete {
            name: spec.name.clone(),
            floating_ip: ip.allocation,
            instance: Some(instance.id),
            source: Box::new(e),
        });
    }

    let ip = FloatingIp {
        instance: Some(instance.id.clone()),
        ..ip
    };
    Ok((instance, ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryProvider, Operation};

    fn web_spec() -> InstanceSpec {
        InstanceSpec {
            name: "web".into(),
            image: "ubuntu-24.04".into(),
            size: "cx22".into(),
        }
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let provider = MemoryProvider::new();

        let first = ensure_floating_ip(&provider, "stagingEip").await.unwrap();
        let second = ensure_floating_ip(&provider, "stagingEip").await.unwrap();

        assert_eq!(first.allocation, second.allocation);
        assert_eq!(provider.calls(Operation::CreateFloatingIp), 1);
    }

    #[tokio::test]
    async fn ensure_creates_once_when_missing() {
        let provider = MemoryProvider::new();

        let ip = ensure_floating_ip(&provider, "prodEip").await.unwrap();

        assert_eq!(ip.name, "prodEip");
        assert_eq!(ip.instance, None);
        assert_eq!(provider.calls(Operation::FindFloatingIpByTag), 1);
        assert_eq!(provider.calls(Operation::CreateFloatingIp), 1);
    }

    #[tokio::test]
    async fn ensure_returns_existing_without_mutation() {
        let provider = MemoryProvider::new();
        let existing = provider.add_floating_ip("eip-111", "stagingEip", None);

        let ip = ensure_floating_ip(&provider, "stagingEip").await.unwrap();

        assert_eq!(ip.allocation, existing);
        assert_eq!(provider.mutations(), 0);
    }

    #[tokio::test]
    async fn ensure_propagates_lookup_errors() {
        let provider = MemoryProvider::new();
        provider.fail_next(Operation::FindFloatingIpByTag, "permission denied");

        let err = ensure_floating_ip(&provider, "stagingEip").await.unwrap_err();

        assert!(
            matches!(err, Error::Provider { operation: "find floating ip by tag", ref message } if message == "permission denied"),
            "{err}"
        );
        assert_eq!(provider.calls(Operation::CreateFloatingIp), 0);
    }

    #[tokio::test]
    async fn ensure_rejects_ambiguous_tags() {
        let provider = MemoryProvider::new();
        provider.add_floating_ip("eip-1", "shared", None);
        provider.add_floating_ip("eip-2", "shared", None);

        let err = ensure_floating_ip(&provider, "shared").await.unwrap_err();

        assert!(matches!(err, Error::LookupAmbiguous { matches: 2, .. }), "{err}");
        assert_eq!(provider.calls(Operation::CreateFloatingIp), 0);
    }

    #[tokio::test]
    async fn ensure_rejects_empty_name_before_any_call() {
        let provider = MemoryProvider::new();

        let err = ensure_floating_ip(&provider, "").await.unwrap_err();

        assert!(matches!(err, Error::InvalidName(_)));
        assert_eq!(provider.calls(Operation::FindFloatingIpByTag), 0);
    }

    #[tokio::test]
    async fn provision_rejects_non_hostname_before_creating_ip() {
        let provider = MemoryProvider::new();
        let spec = InstanceSpec {
            name: "web_1".into(),
            ..web_spec()
        };

        let err = provision_instance_with_floating_ip(&provider, &spec)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidName(_)), "{err}");
        assert_eq!(provider.calls(Operation::FindFloatingIpByTag), 0);
        assert!(provider.floating_ips().is_empty());
    }

    #[tokio::test]
    async fn provision_attaches_fresh_ip() {
        let provider = MemoryProvider::new();

        let (instance, ip) = provision_instance_with_floating_ip(&provider, &web_spec())
            .await
            .unwrap();

        assert_eq!(instance.name, "web");
        assert_eq!(ip.name, "web-eip");
        assert_eq!(ip.instance.as_ref(), Some(&instance.id));
        assert_eq!(provider.allocation_of(&instance.id), Some(ip.allocation));
        assert_eq!(provider.calls(Operation::Associate), 1);
    }

    #[tokio::test]
    async fn provision_reports_orphaned_ip_when_instance_fails() {
        let provider = MemoryProvider::new();
        provider.fail_next(Operation::CreateInstance, "quota exceeded");

        let err = provision_instance_with_floating_ip(&provider, &web_spec())
            .await
            .unwrap_err();

        let Error::ProvisionIncomplete {
            floating_ip,
            instance,
            source,
            ..
        } = err
        else {
            panic!("expected ProvisionIncomplete");
        };
        assert_eq!(instance, None);
        assert!(matches!(*source, Error::Provider { .. }));
        assert_eq!(provider.floating_ips().len(), 1);
        assert_eq!(provider.floating_ips()[0].allocation, floating_ip);
        assert_eq!(provider.calls(Operation::Associate), 0);
    }

    #[tokio::test]
    async fn provision_rerun_reuses_orphaned_ip() {
        let provider = MemoryProvider::new();
        provider.fail_next(Operation::CreateInstance, "quota exceeded");
        provision_instance_with_floating_ip(&provider, &web_spec())
            .await
            .unwrap_err();

        let (_, ip) = provision_instance_with_floating_ip(&provider, &web_spec())
            .await
            .unwrap();

        assert_eq!(provider.calls(Operation::CreateFloatingIp), 1);
        assert_eq!(provider.floating_ips()[0].allocation, ip.allocation);
    }

    #[tokio::test]
    async fn provision_refuses_ip_held_by_other_instance() {
        let provider = MemoryProvider::new();
        let other = provider.add_instance("old-web");
        provider.add_floating_ip("eip-9", "web-eip", Some(&other));

        let err = provision_instance_with_floating_ip(&provider, &web_spec())
            .await
            .unwrap_err();

        let Error::ProvisionIncomplete {
            instance, source, ..
        } = err
        else {
            panic!("expected ProvisionIncomplete");
        };
        assert!(instance.is_some());
        assert!(matches!(*source, Error::AlreadyAssociated { .. }));
        assert_eq!(provider.calls(Operation::Associate), 0);
        assert_eq!(
            provider.allocation_of(&other).map(|a| a.0),
            Some("eip-9".to_string())
        );
    }
}
