use finback_core::TenantId;

use crate::envelope::ExternalEventEnvelope;

/// Marks messages that belong to exactly one tenant.
///
/// Outbound stores partition by this so one tenant never reads another's
/// events.
pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;

    fn belongs_to(&self, tenant_id: &TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

impl TenantScoped for ExternalEventEnvelope {
    fn tenant_id(&self) -> &TenantId {
        ExternalEventEnvelope::tenant_id(self)
    }
}
