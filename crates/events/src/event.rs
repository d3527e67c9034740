//! Business events and the event-type catalogue.
//!
//! Event kinds are a closed enum ([`EventType`]) plus an ancestry table: every
//! tag lists its direct supertypes, and [`EventType::is_a`] walks that table.
//! Listener matching and external-delivery eligibility are both answered from
//! the table, never from runtime type inspection.
//!
//! Events are:
//! - **immutable** (treat them as facts)
//! - **tagged** (the tag drives listener and configuration matching)
//! - **opaque** to the notification core (the payload is plain JSON)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Event-type tag.
///
/// Base tags (`Business`, `Client`, `Loan`, `LoanTransaction`, `Savings`) exist
/// so listeners can subscribe to a whole family. `NoExternal` is a marker:
/// anything that is-a `NoExternal` is never reported outside the process.
/// `Bulk` is reserved for the envelope produced by bulk recording.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum EventType {
    Business,
    NoExternal,
    Client,
    Loan,
    LoanTransaction,
    Savings,

    ClientCreate,
    ClientActivate,
    ClientReject,

    LoanCreate,
    LoanApproved,
    LoanRejected,
    LoanDisbursal,
    LoanClose,
    LoanTransactionMakeRepaymentPre,
    LoanTransactionMakeRepaymentPost,
    LoanAccrualTransactionCreated,
    LoanBalanceChanged,
    LoanDelinquencyRangeChange,

    SavingsDeposit,
    SavingsWithdrawal,

    Bulk,
}

/// Raised when an external name does not match any [`EventType`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::Business,
        EventType::NoExternal,
        EventType::Client,
        EventType::Loan,
        EventType::LoanTransaction,
        EventType::Savings,
        EventType::ClientCreate,
        EventType::ClientActivate,
        EventType::ClientReject,
        EventType::LoanCreate,
        EventType::LoanApproved,
        EventType::LoanRejected,
        EventType::LoanDisbursal,
        EventType::LoanClose,
        EventType::LoanTransactionMakeRepaymentPre,
        EventType::LoanTransactionMakeRepaymentPost,
        EventType::LoanAccrualTransactionCreated,
        EventType::LoanBalanceChanged,
        EventType::LoanDelinquencyRangeChange,
        EventType::SavingsDeposit,
        EventType::SavingsWithdrawal,
        EventType::Bulk,
    ];

    /// Stable external name (used by configuration and outbound envelopes).
    pub fn name(self) -> &'static str {
        match self {
            EventType::Business => "BusinessEvent",
            EventType::NoExternal => "NoExternalEvent",
            EventType::Client => "ClientBusinessEvent",
            EventType::Loan => "LoanBusinessEvent",
            EventType::LoanTransaction => "LoanTransactionBusinessEvent",
            EventType::Savings => "SavingsBusinessEvent",
            EventType::ClientCreate => "ClientCreateBusinessEvent",
            EventType::ClientActivate => "ClientActivateBusinessEvent",
            EventType::ClientReject => "ClientRejectBusinessEvent",
            EventType::LoanCreate => "LoanCreatedBusinessEvent",
            EventType::LoanApproved => "LoanApprovedBusinessEvent",
            EventType::LoanRejected => "LoanRejectedBusinessEvent",
            EventType::LoanDisbursal => "LoanDisbursalBusinessEvent",
            EventType::LoanClose => "LoanCloseBusinessEvent",
            EventType::LoanTransactionMakeRepaymentPre => {
                "LoanTransactionMakeRepaymentPreBusinessEvent"
            }
            EventType::LoanTransactionMakeRepaymentPost => {
                "LoanTransactionMakeRepaymentPostBusinessEvent"
            }
            EventType::LoanAccrualTransactionCreated => "LoanAccrualTransactionCreatedBusinessEvent",
            EventType::LoanBalanceChanged => "LoanBalanceChangedBusinessEvent",
            EventType::LoanDelinquencyRangeChange => "LoanDelinquencyRangeChangeBusinessEvent",
            EventType::SavingsDeposit => "SavingsDepositBusinessEvent",
            EventType::SavingsWithdrawal => "SavingsWithdrawalBusinessEvent",
            EventType::Bulk => "BulkBusinessEvent",
        }
    }

    /// Direct supertypes.
    pub fn parents(self) -> &'static [EventType] {
        use EventType::*;
        match self {
            Business => &[],
            NoExternal | Client | Loan | Savings | Bulk => &[Business],
            LoanTransaction => &[Loan],
            ClientCreate | ClientActivate | ClientReject => &[Client],
            LoanCreate | LoanApproved | LoanRejected | LoanDisbursal | LoanClose
            | LoanDelinquencyRangeChange => &[Loan],
            LoanTransactionMakeRepaymentPre
            | LoanTransactionMakeRepaymentPost
            | LoanAccrualTransactionCreated => &[LoanTransaction],
            LoanBalanceChanged => &[Loan, NoExternal],
            SavingsDeposit | SavingsWithdrawal => &[Savings],
        }
    }

    /// `true` if `self` is `ancestor` or (transitively) derives from it.
    pub fn is_a(self, ancestor: EventType) -> bool {
        self == ancestor || self.parents().iter().any(|p| p.is_a(ancestor))
    }

    /// Family tags that only exist to be subscribed to.
    pub fn is_abstract(self) -> bool {
        matches!(
            self,
            EventType::Business
                | EventType::NoExternal
                | EventType::Client
                | EventType::Loan
                | EventType::LoanTransaction
                | EventType::Savings
        )
    }

    pub fn is_externally_reportable(self) -> bool {
        !self.is_a(EventType::NoExternal)
    }

    /// Concrete, reportable types that carry an external-delivery switch.
    pub fn configurable() -> impl Iterator<Item = EventType> {
        Self::ALL.iter().copied().filter(|t| {
            !t.is_abstract() && *t != EventType::Bulk && t.is_externally_reportable()
        })
    }

    /// Aggregate family the event belongs to (`Loan`, `Client`, `Savings`).
    pub fn category(self) -> &'static str {
        if self.is_a(EventType::Loan) {
            "Loan"
        } else if self.is_a(EventType::Client) {
            "Client"
        } else if self.is_a(EventType::Savings) {
            "Savings"
        } else {
            "Business"
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl TryFrom<String> for EventType {
    type Error = UnknownEventType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for &'static str {
    fn from(value: EventType) -> Self {
        value.name()
    }
}

/// A single notification that a domain action occurred (or is about to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_type: EventType,
    aggregate_id: Option<u64>,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_type: EventType, payload: JsonValue) -> Self {
        Self {
            event_type,
            aggregate_id: None,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<u64>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn aggregate_id(&self) -> Option<u64> {
        self.aggregate_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Ordered aggregate of events recorded during one bulk-recording session.
///
/// Reserved: only the recording session builds these. Passing one to the
/// notifier's raise entry points is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkEvent {
    events: Vec<DomainEvent>,
}

impl BulkEvent {
    pub fn new(events: Vec<DomainEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Anything the notification core can route.
#[derive(Debug, Clone, PartialEq)]
pub enum BusinessEvent {
    Domain(DomainEvent),
    Bulk(BulkEvent),
}

impl BusinessEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            BusinessEvent::Domain(e) => e.event_type(),
            BusinessEvent::Bulk(_) => EventType::Bulk,
        }
    }

    pub fn is_externally_reportable(&self) -> bool {
        self.event_type().is_externally_reportable()
    }

    pub fn as_domain(&self) -> Option<&DomainEvent> {
        match self {
            BusinessEvent::Domain(e) => Some(e),
            BusinessEvent::Bulk(_) => None,
        }
    }
}

impl From<DomainEvent> for BusinessEvent {
    fn from(value: DomainEvent) -> Self {
        BusinessEvent::Domain(value)
    }
}

impl From<BulkEvent> for BusinessEvent {
    fn from(value: BulkEvent) -> Self {
        BusinessEvent::Bulk(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestry_is_transitive() {
        let repayment = EventType::LoanTransactionMakeRepaymentPost;
        assert!(repayment.is_a(EventType::LoanTransaction));
        assert!(repayment.is_a(EventType::Loan));
        assert!(repayment.is_a(EventType::Business));
        assert!(!repayment.is_a(EventType::Client));
        assert!(!EventType::Loan.is_a(repayment));
    }

    #[test]
    fn no_external_marker_disables_reporting() {
        assert!(!EventType::LoanBalanceChanged.is_externally_reportable());
        assert!(!EventType::NoExternal.is_externally_reportable());
        assert!(EventType::LoanApproved.is_externally_reportable());
        assert!(EventType::Bulk.is_externally_reportable());
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for t in EventType::ALL {
            assert_eq!(t.name().parse::<EventType>().unwrap(), *t);
        }
        assert!("NotAnEvent".parse::<EventType>().is_err());
    }

    #[test]
    fn configurable_set_excludes_families_and_markers() {
        let configurable: Vec<_> = EventType::configurable().collect();
        assert!(configurable.contains(&EventType::ClientActivate));
        assert!(!configurable.contains(&EventType::Loan));
        assert!(!configurable.contains(&EventType::Bulk));
        assert!(!configurable.contains(&EventType::LoanBalanceChanged));
    }

    #[test]
    fn serializes_as_external_name() {
        let json = serde_json::to_string(&EventType::LoanClose).unwrap();
        assert_eq!(json, "\"LoanCloseBusinessEvent\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::LoanClose);
    }

    #[test]
    fn category_follows_family() {
        assert_eq!(EventType::LoanAccrualTransactionCreated.category(), "Loan");
        assert_eq!(EventType::ClientCreate.category(), "Client");
        assert_eq!(EventType::SavingsDeposit.category(), "Savings");
        assert_eq!(EventType::Bulk.category(), "Business");
    }
}
