//! Per-tenant, per-event-type external delivery switches.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use finback_core::{RequestContext, TenantId};

use crate::event::EventType;

/// Answers "is external delivery enabled for this event type" for the tenant
/// of the current request.
///
/// A type with no configuration entry is an error, not "disabled".
pub trait EventTypeGate: Send + Sync {
    fn is_enabled(&self, event_type: EventType) -> Result<bool, GateError>;
}

impl<G> EventTypeGate for std::sync::Arc<G>
where
    G: EventTypeGate + ?Sized,
{
    fn is_enabled(&self, event_type: EventType) -> Result<bool, GateError> {
        (**self).is_enabled(event_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("no external event configuration for type {0}")]
    UnknownEventType(String),

    #[error("event configuration lock poisoned")]
    Poisoned,
}

/// One configuration row, as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfiguration {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub enabled: bool,
}

type Flags = BTreeMap<EventType, bool>;

/// In-memory configuration: one flag per configurable event type, per tenant.
///
/// A tenant that never changed its configuration sees the initial flags
/// (every type disabled unless built with [`with_enabled`](Self::with_enabled)).
/// Outside a tenant context [`EventTypeGate::is_enabled`] answers from the
/// initial flags too.
#[derive(Debug)]
pub struct InMemoryEventTypeGate {
    initial: Flags,
    tenants: RwLock<HashMap<TenantId, Flags>>,
}

impl InMemoryEventTypeGate {
    pub fn new() -> Self {
        Self {
            initial: EventType::configurable().map(|t| (t, false)).collect(),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Every tenant starts with `enabled` switched on (convenient for wiring
    /// and tests).
    pub fn with_enabled(enabled: impl IntoIterator<Item = EventType>) -> Result<Self, GateError> {
        let mut gate = Self::new();
        for t in enabled {
            match gate.initial.get_mut(&t) {
                Some(flag) => *flag = true,
                None => return Err(GateError::UnknownEventType(t.name().to_string())),
            }
        }
        Ok(gate)
    }

    pub fn is_enabled_for(&self, tenant: &TenantId, event_type: EventType) -> Result<bool, GateError> {
        let tenants = self.tenants.read().map_err(|_| GateError::Poisoned)?;
        lookup(tenants.get(tenant).unwrap_or(&self.initial), event_type)
    }

    pub fn set_for(
        &self,
        tenant: &TenantId,
        event_type: EventType,
        enabled: bool,
    ) -> Result<(), GateError> {
        let mut tenants = self.tenants.write().map_err(|_| GateError::Poisoned)?;
        let flags = tenants
            .entry(tenant.clone())
            .or_insert_with(|| self.initial.clone());
        match flags.get_mut(&event_type) {
            Some(flag) => {
                *flag = enabled;
                Ok(())
            }
            None => Err(GateError::UnknownEventType(event_type.name().to_string())),
        }
    }

    /// All rows of `tenant`, ordered by type.
    pub fn configurations_for(&self, tenant: &TenantId) -> Result<Vec<EventConfiguration>, GateError> {
        let tenants = self.tenants.read().map_err(|_| GateError::Poisoned)?;
        Ok(tenants
            .get(tenant)
            .unwrap_or(&self.initial)
            .iter()
            .map(|(t, enabled)| EventConfiguration {
                event_type: *t,
                enabled: *enabled,
            })
            .collect())
    }

    /// Apply `changes` (external type name → flag) to `tenant` atomically.
    ///
    /// Unknown names reject the whole update. Returns only the entries whose
    /// value actually changed.
    pub fn update_for(
        &self,
        tenant: &TenantId,
        changes: &BTreeMap<String, bool>,
    ) -> Result<BTreeMap<String, bool>, GateError> {
        let mut resolved = Vec::with_capacity(changes.len());
        for (name, enabled) in changes {
            let event_type = name
                .parse::<EventType>()
                .ok()
                .filter(|t| self.initial.contains_key(t))
                .ok_or_else(|| GateError::UnknownEventType(name.clone()))?;
            resolved.push((event_type, *enabled));
        }

        let mut tenants = self.tenants.write().map_err(|_| GateError::Poisoned)?;
        let flags = tenants
            .entry(tenant.clone())
            .or_insert_with(|| self.initial.clone());
        let mut changed = BTreeMap::new();
        for (event_type, enabled) in resolved {
            if let Some(flag) = flags.get_mut(&event_type) {
                if *flag != enabled {
                    *flag = enabled;
                    changed.insert(event_type.name().to_string(), enabled);
                }
            }
        }
        Ok(changed)
    }
}

fn lookup(flags: &Flags, event_type: EventType) -> Result<bool, GateError> {
    flags
        .get(&event_type)
        .copied()
        .ok_or_else(|| GateError::UnknownEventType(event_type.name().to_string()))
}

impl Default for InMemoryEventTypeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTypeGate for InMemoryEventTypeGate {
    fn is_enabled(&self, event_type: EventType) -> Result<bool, GateError> {
        match RequestContext::current_tenant() {
            Some(tenant) => self.is_enabled_for(&tenant, event_type),
            None => lookup(&self.initial, event_type),
        }
    }
}
