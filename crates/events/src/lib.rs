//! Business events and their delivery.
//!
//! - in-process listeners, matched by event-type ancestry ([`listener`], [`dispatcher`])
//! - external delivery gating ([`gate`], [`sink`])
//! - transaction-scoped buffering ([`transaction`]) and bulk recording ([`recording`])
//! - the [`notifier`] that ties them together, and the per-request [`scope`]

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod gate;
pub mod listener;
pub mod notifier;
pub mod recording;
pub mod scope;
pub mod sink;
pub mod tenant;
pub mod transaction;

pub use dispatcher::EventDispatcher;
pub use envelope::ExternalEventEnvelope;
pub use error::NotifyError;
pub use event::{BulkEvent, BusinessEvent, DomainEvent, EventType, UnknownEventType};
pub use gate::{EventConfiguration, EventTypeGate, GateError, InMemoryEventTypeGate};
pub use listener::{
    BusinessEventListener, ListenerRegistry, ListenerRegistryBuilder, Phase, Registration,
};
pub use notifier::{BusinessEventNotifier, NotifierSettings};
pub use recording::BulkRecordingSession;
pub use scope::RequestScope;
pub use sink::{ExternalSink, SinkError};
pub use tenant::TenantScoped;
pub use transaction::{
    PendingEntry, PendingEventFrame, TransactionEventBuffer, TransactionHost,
    TransactionSynchronization,
};
