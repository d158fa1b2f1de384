use common::AggregateId;
use thiserror::Error;
use unit_of_work::{RepositoryError, UnitOfWorkError};

/// Errors raised by the bank service.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Insufficient funds on {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AggregateId,
        balance: i64,
        requested: i64,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
}

impl From<domain::DomainError> for DemoError {
    fn from(error: domain::DomainError) -> Self {
        Self::Repository(error.into())
    }
}

impl DemoError {
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_concurrency_conflict(),
            Self::UnitOfWork(e) => e
                .repository_error()
                .is_some_and(RepositoryError::is_concurrency_conflict),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DemoError>;
