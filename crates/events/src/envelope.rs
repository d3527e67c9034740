use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use finback_core::{RequestContext, TenantId};

use crate::event::{BusinessEvent, DomainEvent, EventType};
use crate::sink::SinkError;

/// Outbound form of a [`BusinessEvent`], as handed to external consumers.
///
/// Notes:
/// - **Multi-tenancy** is carried by `tenant_id`, taken from the request
///   context current at delivery time.
/// - A bulk event becomes a single envelope of type `BulkBusinessEvent`
///   whose payload is the ordered list of its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEventEnvelope {
    event_id: Uuid,
    tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<String>,

    #[serde(rename = "type")]
    event_type: EventType,
    category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregate_id: Option<u64>,

    payload: JsonValue,
    created_at: DateTime<Utc>,
}

impl ExternalEventEnvelope {
    /// Stamp `event` with the tenant, correlation and idempotency key of the
    /// current thread's request context.
    pub fn from_event(event: &BusinessEvent) -> Result<Self, SinkError> {
        let tenant_id = RequestContext::current_tenant().ok_or(SinkError::MissingTenant)?;
        let correlation_id =
            RequestContext::current_correlation_id().map(|c| c.as_str().to_string());
        let idempotency_key = RequestContext::idempotency_key();

        let (aggregate_id, payload) = match event {
            BusinessEvent::Domain(e) => (e.aggregate_id(), e.payload().clone()),
            BusinessEvent::Bulk(bulk) => (
                None,
                JsonValue::Array(bulk.events().iter().map(describe).collect()),
            ),
        };
        let event_type = event.event_type();

        Ok(Self {
            event_id: Uuid::now_v7(),
            tenant_id,
            correlation_id,
            idempotency_key,
            event_type,
            category: event_type.category().to_string(),
            aggregate_id,
            payload,
            created_at: Utc::now(),
        })
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn aggregate_id(&self) -> Option<u64> {
        self.aggregate_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn describe(event: &DomainEvent) -> JsonValue {
    json!({
        "type": event.event_type().name(),
        "category": event.event_type().category(),
        "aggregateId": event.aggregate_id(),
        "payload": event.payload(),
        "occurredAt": event.occurred_at(),
    })
}

#[cfg(test)]
mod tests {
    use finback_core::CorrelationId;

    use super::*;
    use crate::event::BulkEvent;

    fn tenant() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    #[test]
    fn requires_a_tenant() {
        let event: BusinessEvent = DomainEvent::new(EventType::ClientCreate, json!({})).into();
        assert_eq!(
            ExternalEventEnvelope::from_event(&event),
            Err(SinkError::MissingTenant)
        );
    }

    #[test]
    fn stamps_request_context() {
        let _ctx = RequestContext::new(tenant())
            .with_correlation_id(CorrelationId::new("corr-1"))
            .install();
        RequestContext::set_idempotency_key("key-1");

        let event: BusinessEvent = DomainEvent::new(EventType::LoanApproved, json!({"x": 1}))
            .with_aggregate_id(7u64)
            .into();
        let envelope = ExternalEventEnvelope::from_event(&event).unwrap();

        assert_eq!(envelope.tenant_id(), &tenant());
        assert_eq!(envelope.correlation_id(), Some("corr-1"));
        assert_eq!(envelope.idempotency_key(), Some("key-1"));
        assert_eq!(envelope.category(), "Loan");
        assert_eq!(envelope.aggregate_id(), Some(7));

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["type"], "LoanApprovedBusinessEvent");
        assert_eq!(wire["tenantId"], "acme");
    }

    #[test]
    fn bulk_payload_lists_members_in_order() {
        let _ctx = RequestContext::new(tenant()).install();
        let members = vec![
            DomainEvent::new(EventType::LoanAccrualTransactionCreated, json!({})).with_aggregate_id(1u64),
            DomainEvent::new(EventType::LoanAccrualTransactionCreated, json!({})).with_aggregate_id(2u64),
        ];
        let event = BusinessEvent::Bulk(BulkEvent::new(members));

        let envelope = ExternalEventEnvelope::from_event(&event).unwrap();
        assert_eq!(envelope.event_type(), EventType::Bulk);
        let ids: Vec<_> = envelope
            .payload()
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["aggregateId"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
