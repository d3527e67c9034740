use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use finback_portfolio::{Client, JournalEntry, Loan};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub display_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLoanRequest {
    pub client_id: u64,
    /// Principal in minor units.
    pub principal: i64,
    pub currency: String,
    #[serde(default)]
    pub annual_rate_bps: u32,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentRequest {
    /// Minor units, in the loan's currency.
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventConfigurationRequest {
    pub external_event_configurations: BTreeMap<String, bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchParams {
    #[serde(default)]
    pub enclosing_transaction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequestItem {
    pub request_id: u64,
    pub relative_url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<BatchHeader>,
    /// Either a JSON string (sent verbatim) or a JSON value.
    #[serde(default)]
    pub body: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponseItem {
    pub request_id: u64,
    pub status_code: u16,
    pub headers: Vec<BatchHeader>,
    pub body: Option<String>,
}

/// Command responses identify the resource the way every write endpoint does.
pub fn command_body(resource_id: u64, changes: JsonValue) -> JsonValue {
    json!({
        "resourceId": resource_id,
        "changes": changes,
    })
}

pub fn client_to_json(client: &Client) -> JsonValue {
    json!({
        "id": client.id(),
        "displayName": client.display_name(),
        "externalId": client.external_id(),
        "status": client.status(),
    })
}

pub fn loan_to_json(loan: &Loan, activity: &[JournalEntry]) -> JsonValue {
    json!({
        "id": loan.id(),
        "clientId": loan.client_id(),
        "status": loan.status(),
        "currency": loan.principal().currency(),
        "principal": loan.principal().minor_units(),
        "outstanding": loan.outstanding().minor_units(),
        "accruedInterest": loan.accrued_interest().minor_units(),
        "transactions": loan.transactions(),
        "activity": activity
            .iter()
            .map(|e| json!({ "type": e.event_type, "recordedAt": e.recorded_at }))
            .collect::<Vec<_>>(),
    })
}
