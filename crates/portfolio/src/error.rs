use thiserror::Error;

use finback_core::DomainError;
use finback_events::NotifyError;
use finback_infra::TransactionError;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

pub type PortfolioResult<T> = Result<T, PortfolioError>;
