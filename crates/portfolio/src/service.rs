//! Write services: every operation runs in a `Required` transaction and
//! raises its business events through the notifier.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use finback_core::{ClientId, DomainError, LoanId, Money, TenantId};
use finback_events::{BusinessEventNotifier, DomainEvent, EventType};
use finback_infra::{Propagation, TransactionManager};

use crate::client::Client;
use crate::error::PortfolioResult;
use crate::loan::Loan;
use crate::repository::InMemoryRepository;

fn client_event(event_type: EventType, client: &Client) -> DomainEvent {
    DomainEvent::new(
        event_type,
        json!({
            "clientId": client.id(),
            "displayName": client.display_name(),
            "status": client.status(),
        }),
    )
    .with_aggregate_id(client.id())
}

fn loan_event(event_type: EventType, loan: &Loan, extra: JsonValue) -> DomainEvent {
    let mut payload = json!({
        "loanId": loan.id(),
        "clientId": loan.client_id(),
        "status": loan.status(),
        "currency": loan.principal().currency(),
        "outstanding": loan.outstanding().minor_units(),
    });
    if let (Some(payload), JsonValue::Object(extra)) = (payload.as_object_mut(), extra) {
        payload.extend(extra);
    }
    DomainEvent::new(event_type, payload).with_aggregate_id(loan.id())
}

#[derive(Clone)]
pub struct ClientWriteService {
    clients: InMemoryRepository<Client>,
    notifier: Arc<BusinessEventNotifier>,
    transactions: Arc<TransactionManager>,
}

impl ClientWriteService {
    pub fn new(
        clients: InMemoryRepository<Client>,
        notifier: Arc<BusinessEventNotifier>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            clients,
            notifier,
            transactions,
        }
    }

    pub fn create_client(
        &self,
        tenant_id: &TenantId,
        display_name: &str,
        external_id: Option<String>,
    ) -> PortfolioResult<Client> {
        self.transactions.execute(Propagation::Required, || {
            if let Some(external_id) = external_id.as_deref() {
                let taken = self
                    .clients
                    .list(tenant_id)?
                    .iter()
                    .any(|c| c.external_id() == Some(external_id));
                if taken {
                    return Err(DomainError::conflict(format!(
                        "external id {external_id} is already in use"
                    ))
                    .into());
                }
            }
            let id = ClientId::new(self.clients.next_id()?);
            let client = Client::submit(id, tenant_id.clone(), display_name, external_id)?;
            self.clients.save(client.clone())?;
            self.notifier.raise_post(client_event(EventType::ClientCreate, &client))?;
            info!(tenant_id = %tenant_id, client_id = %id, "client created");
            Ok(client)
        })
    }

    pub fn activate_client(&self, tenant_id: &TenantId, id: ClientId) -> PortfolioResult<Client> {
        self.transactions.execute(Propagation::Required, || {
            let mut client = self.get_client(tenant_id, id)?;
            client.activate()?;
            self.clients.save(client.clone())?;
            self.notifier.raise_post(client_event(EventType::ClientActivate, &client))?;
            info!(tenant_id = %tenant_id, client_id = %id, "client activated");
            Ok(client)
        })
    }

    pub fn get_client(&self, tenant_id: &TenantId, id: ClientId) -> PortfolioResult<Client> {
        Ok(self
            .clients
            .get(tenant_id, id.get())?
            .ok_or_else(|| DomainError::not_found(format!("client {id}")))?)
    }
}

/// Result of one accrual run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualSummary {
    pub loans_scanned: usize,
    pub accruals_posted: usize,
}

#[derive(Clone)]
pub struct LoanWriteService {
    loans: InMemoryRepository<Loan>,
    clients: InMemoryRepository<Client>,
    notifier: Arc<BusinessEventNotifier>,
    transactions: Arc<TransactionManager>,
}

impl LoanWriteService {
    pub fn new(
        loans: InMemoryRepository<Loan>,
        clients: InMemoryRepository<Client>,
        notifier: Arc<BusinessEventNotifier>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            loans,
            clients,
            notifier,
            transactions,
        }
    }

    /// Create, approve and disburse a loan for an active client.
    pub fn open_loan(
        &self,
        tenant_id: &TenantId,
        client_id: ClientId,
        principal: Money,
        annual_rate_bps: u32,
    ) -> PortfolioResult<Loan> {
        self.transactions.execute(Propagation::Required, || {
            let client = self
                .clients
                .get(tenant_id, client_id.get())?
                .ok_or_else(|| DomainError::not_found(format!("client {client_id}")))?;
            if !client.can_transact() {
                return Err(DomainError::validation(format!("client {client_id} is not active")).into());
            }

            let id = LoanId::new(self.loans.next_id()?);
            let mut loan = Loan::submit(id, tenant_id.clone(), client_id, principal, annual_rate_bps)?;
            self.loans.save(loan.clone())?;
            self.notifier
                .raise_post(loan_event(EventType::LoanCreate, &loan, json!({})))?;

            self.notifier
                .raise_post(loan_event(EventType::LoanApproved, &loan, json!({})))?;
            self.notifier
                .raise_pre(loan_event(EventType::LoanDisbursal, &loan, json!({})))?;
            let amount = loan.disburse()?.amount.minor_units();
            self.loans.save(loan.clone())?;
            self.notifier.raise_post(loan_event(
                EventType::LoanDisbursal,
                &loan,
                json!({ "amount": amount }),
            ))?;

            info!(tenant_id = %tenant_id, loan_id = %id, "loan disbursed");
            Ok(loan)
        })
    }

    /// Apply a repayment; a loan repaid in full is closed.
    pub fn make_repayment(
        &self,
        tenant_id: &TenantId,
        loan_id: LoanId,
        amount_minor: i64,
    ) -> PortfolioResult<Loan> {
        self.transactions.execute(Propagation::Required, || {
            let mut loan = self.get_loan(tenant_id, loan_id)?;
            let amount = Money::new(loan.principal().currency(), amount_minor)?;

            self.notifier.raise_pre(loan_event(
                EventType::LoanTransactionMakeRepaymentPre,
                &loan,
                json!({ "amount": amount_minor }),
            ))?;
            let sequence = loan.repay(amount)?.sequence;
            self.loans.save(loan.clone())?;
            self.notifier.raise_post(loan_event(
                EventType::LoanTransactionMakeRepaymentPost,
                &loan,
                json!({ "amount": amount_minor, "transactionSequence": sequence }),
            ))?;
            self.notifier
                .raise_post(loan_event(EventType::LoanBalanceChanged, &loan, json!({})))?;

            if loan.is_fully_repaid() {
                loan.close()?;
                self.loans.save(loan.clone())?;
                self.notifier
                    .raise_post(loan_event(EventType::LoanClose, &loan, json!({})))?;
                info!(tenant_id = %tenant_id, loan_id = %loan_id, "loan closed");
            }
            Ok(loan)
        })
    }

    /// Post one day of interest on every active loan of the tenant.
    ///
    /// All accrual events of the run leave as a single external event.
    pub fn post_accruals(&self, tenant_id: &TenantId) -> PortfolioResult<AccrualSummary> {
        self.transactions.execute(Propagation::Required, || {
            self.notifier.start_recording();
            match self.accrue_all(tenant_id) {
                Ok(summary) => {
                    self.notifier.stop_recording()?;
                    info!(
                        tenant_id = %tenant_id,
                        loans = summary.loans_scanned,
                        accruals = summary.accruals_posted,
                        "accruals posted"
                    );
                    Ok(summary)
                }
                Err(err) => {
                    self.notifier.reset_recording();
                    Err(err)
                }
            }
        })
    }

    fn accrue_all(&self, tenant_id: &TenantId) -> PortfolioResult<AccrualSummary> {
        let mut summary = AccrualSummary {
            loans_scanned: 0,
            accruals_posted: 0,
        };
        for mut loan in self.loans.list(tenant_id)? {
            if loan.status() != crate::loan::LoanStatus::Active {
                continue;
            }
            summary.loans_scanned += 1;
            let Some(amount) = loan.accrue_daily_interest()?.map(|tx| tx.amount.minor_units()) else {
                continue;
            };
            self.loans.save(loan.clone())?;
            self.notifier.raise_post(loan_event(
                EventType::LoanAccrualTransactionCreated,
                &loan,
                json!({ "amount": amount }),
            ))?;
            summary.accruals_posted += 1;
        }
        Ok(summary)
    }

    pub fn get_loan(&self, tenant_id: &TenantId, id: LoanId) -> PortfolioResult<Loan> {
        Ok(self
            .loans
            .get(tenant_id, id.get())?
            .ok_or_else(|| DomainError::not_found(format!("loan {id}")))?)
    }
}
