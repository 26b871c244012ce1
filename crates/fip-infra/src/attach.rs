use tracing::info;

use crate::types::{Association, FloatingIp, InstanceId};
use crate::{CloudProvider, Error, Result};

/// Associate `ip` with `instance`, enforcing one floating IP per instance.
///
/// Re-attaching the same pair is a no-op. An instance that already holds a
/// different floating IP, or a floating IP held by another instance, is
/// rejected with [`Error::AlreadyAssociated`] instead of relying on the
/// provider to silently move it.
pub async fn attach(
    provider: &dyn CloudProvider,
    instance: &InstanceId,
    ip: &FloatingIp,
) -> Result<Association> {
    if let Some(held) = provider.find_floating_ip_by_instance(instance).await? {
        if held.allocation == ip.allocation {
            return Ok(Association {
                instance: instance.clone(),
                allocation: ip.allocation.clone(),
            });
        }
        return Err(Error::AlreadyAssociated {
            instance: instance.clone(),
            allocation: ip.allocation.clone(),
            reason: format!("instance already holds floating ip {}", held.allocation),
        });
    }

    if let Some(owner) = ip.instance.as_ref().filter(|owner| *owner != instance) {
        return Err(Error::AlreadyAssociated {
            instance: instance.clone(),
            allocation: ip.allocation.clone(),
            reason: format!("floating ip is associated with instance {owner}"),
        });
    }

    let association = provider.associate(instance, &ip.allocation).await?;
    info!(
        instance = %instance,
        allocation = %ip.allocation,
        address = %ip.address,
        "floating ip attached"
    );
    Ok(association)
}
