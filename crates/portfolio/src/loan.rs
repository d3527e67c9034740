use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use finback_core::{ClientId, DomainError, DomainResult, LoanId, Money, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Submitted,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanTransactionKind {
    Disbursement,
    Repayment,
    Accrual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTransaction {
    pub sequence: u32,
    pub kind: LoanTransactionKind,
    pub amount: Money,
    pub outstanding_after: Money,
    pub posted_at: DateTime<Utc>,
}

/// A loan account. Amounts share the principal's currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    id: LoanId,
    tenant_id: TenantId,
    client_id: ClientId,
    principal: Money,
    /// Nominal annual rate in basis points.
    annual_rate_bps: u32,
    outstanding: Money,
    accrued_interest: Money,
    status: LoanStatus,
    transactions: Vec<LoanTransaction>,
}

impl Loan {
    pub fn submit(
        id: LoanId,
        tenant_id: TenantId,
        client_id: ClientId,
        principal: Money,
        annual_rate_bps: u32,
    ) -> DomainResult<Self> {
        if !principal.is_positive() {
            return Err(DomainError::validation("principal must be positive"));
        }
        if annual_rate_bps > 100_000 {
            return Err(DomainError::validation("annual rate exceeds 1000%"));
        }
        let zero = Money::zero(principal.currency())?;
        Ok(Self {
            id,
            tenant_id,
            client_id,
            outstanding: zero.clone(),
            accrued_interest: zero,
            principal,
            annual_rate_bps,
            status: LoanStatus::Submitted,
            transactions: Vec::new(),
        })
    }

    pub fn id(&self) -> LoanId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn principal(&self) -> &Money {
        &self.principal
    }

    pub fn outstanding(&self) -> &Money {
        &self.outstanding
    }

    pub fn accrued_interest(&self) -> &Money {
        &self.accrued_interest
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn transactions(&self) -> &[LoanTransaction] {
        &self.transactions
    }

    /// Approve and pay out the full principal.
    pub fn disburse(&mut self) -> DomainResult<&LoanTransaction> {
        if self.status != LoanStatus::Submitted {
            return Err(DomainError::conflict(format!("loan {} was already disbursed", self.id)));
        }
        self.status = LoanStatus::Active;
        self.outstanding = self.principal.clone();
        Ok(self.post(LoanTransactionKind::Disbursement, self.principal.clone()))
    }

    pub fn repay(&mut self, amount: Money) -> DomainResult<&LoanTransaction> {
        self.ensure_active()?;
        if !amount.is_positive() {
            return Err(DomainError::validation("repayment amount must be positive"));
        }
        let remaining = self.outstanding.checked_sub(&amount)?;
        if remaining.minor_units() < 0 {
            return Err(DomainError::validation(format!(
                "repayment of {} exceeds outstanding balance {}",
                amount.minor_units(),
                self.outstanding.minor_units()
            )));
        }
        self.outstanding = remaining;
        Ok(self.post(LoanTransactionKind::Repayment, amount))
    }

    /// Post one day of interest on the outstanding balance.
    ///
    /// Returns `None` when nothing accrues (zero balance or zero rate).
    pub fn accrue_daily_interest(&mut self) -> DomainResult<Option<&LoanTransaction>> {
        self.ensure_active()?;
        let daily = i128::from(self.outstanding.minor_units()) * i128::from(self.annual_rate_bps)
            / (10_000 * 365);
        let daily = i64::try_from(daily).map_err(|_| DomainError::validation("accrual overflow"))?;
        if daily == 0 {
            return Ok(None);
        }
        let amount = Money::new(self.principal.currency(), daily)?;
        self.accrued_interest = self.accrued_interest.checked_add(&amount)?;
        Ok(Some(self.post(LoanTransactionKind::Accrual, amount)))
    }

    pub fn is_fully_repaid(&self) -> bool {
        self.status == LoanStatus::Active && self.outstanding.is_zero()
    }

    pub fn close(&mut self) -> DomainResult<()> {
        self.ensure_active()?;
        if !self.outstanding.is_zero() {
            return Err(DomainError::invariant(format!(
                "loan {} still has an outstanding balance",
                self.id
            )));
        }
        self.status = LoanStatus::Closed;
        Ok(())
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if self.status != LoanStatus::Active {
            return Err(DomainError::conflict(format!("loan {} is not active", self.id)));
        }
        Ok(())
    }

    fn post(&mut self, kind: LoanTransactionKind, amount: Money) -> &LoanTransaction {
        let sequence = self.transactions.len() as u32 + 1;
        self.transactions.push(LoanTransaction {
            sequence,
            kind,
            amount,
            outstanding_after: self.outstanding.clone(),
            posted_at: Utc::now(),
        });
        &self.transactions[self.transactions.len() - 1]
    }
}
