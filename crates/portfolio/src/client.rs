use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use finback_core::{ClientId, DomainError, DomainResult, TenantId};

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Pending,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    id: ClientId,
    tenant_id: TenantId,
    display_name: String,
    external_id: Option<String>,
    status: ClientStatus,
    submitted_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
}

impl Client {
    /// A new, pending client.
    pub fn submit(
        id: ClientId,
        tenant_id: TenantId,
        display_name: impl Into<String>,
        external_id: Option<String>,
    ) -> DomainResult<Self> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(DomainError::validation("client name must not be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            display_name,
            external_id,
            status: ClientStatus::Pending,
            submitted_at: Utc::now(),
            activated_at: None,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Only active clients may hold loans.
    pub fn can_transact(&self) -> bool {
        self.status == ClientStatus::Active
    }

    pub fn activate(&mut self) -> DomainResult<()> {
        if self.status != ClientStatus::Pending {
            return Err(DomainError::conflict(format!("client {} is already active", self.id)));
        }
        self.status = ClientStatus::Active;
        self.activated_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::submit(ClientId::new(1), TenantId::parse("t").unwrap(), "Ada", None).unwrap()
    }

    #[test]
    fn name_is_required() {
        assert!(Client::submit(ClientId::new(1), TenantId::parse("t").unwrap(), "  ", None).is_err());
    }

    #[test]
    fn activation_happens_once() {
        let mut c = client();
        assert!(!c.can_transact());
        c.activate().unwrap();
        assert!(c.can_transact());
        assert!(matches!(c.activate(), Err(DomainError::Conflict(_))));
    }
}
