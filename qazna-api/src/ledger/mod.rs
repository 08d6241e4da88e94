//! The ledger capability set and its backends.
//!
//! Three interchangeable implementations present the same contract: an
//! in-memory store for tests and DSN-less deployments, a PostgreSQL store
//! with serializable transfer semantics, and a gRPC proxy to a standalone
//! ledger process.

pub mod memory;
pub mod postgres;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RequestContext;
use crate::models::{Account, Money, Transaction};

/// Listing page bounds. A zero or out-of-range limit falls back to the
/// default.
pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found")]
    NotFound,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("invalid amount (must be > 0)")]
    InvalidAmount,

    #[error("invalid currency")]
    InvalidCurrency,

    #[error("ledger storage error")]
    Storage(#[source] anyhow::Error),

    #[error("ledger unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(anyhow::Error::new(err))
    }
}

/// Deterministic account/transfer state machine. Transfers are never
/// retried internally; callers retry with the same idempotency key.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_account(
        &self,
        ctx: &RequestContext,
        initial: Money,
    ) -> Result<Account, LedgerError>;

    async fn get_account(&self, ctx: &RequestContext, id: &str) -> Result<Account, LedgerError>;

    /// Returns a zero amount when the account exists but holds no balance
    /// row for the currency.
    async fn get_balance(
        &self,
        ctx: &RequestContext,
        id: &str,
        currency: &str,
    ) -> Result<Money, LedgerError>;

    async fn transfer(
        &self,
        ctx: &RequestContext,
        from_id: &str,
        to_id: &str,
        amount: Money,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, LedgerError>;

    /// Returns up to `limit` transactions with `sequence > after_seq` in
    /// ascending order, plus the largest returned sequence (0 when empty).
    async fn list_transactions(
        &self,
        ctx: &RequestContext,
        limit: usize,
        after_seq: u64,
    ) -> Result<(Vec<Transaction>, u64), LedgerError>;
}

pub(crate) fn clamp_limit(limit: usize) -> usize {
    if limit == 0 || limit > MAX_LIST_LIMIT {
        DEFAULT_LIST_LIMIT
    } else {
        limit
    }
}

pub(crate) fn validate_transfer_amount(amount: &Money) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidAmount);
    }
    if amount.currency.is_empty() || amount.currency.len() > crate::models::ledger::MAX_CURRENCY_LEN
    {
        return Err(LedgerError::InvalidCurrency);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamping() {
        assert_eq!(clamp_limit(0), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(1), 1);
        assert_eq!(clamp_limit(1000), 1000);
        assert_eq!(clamp_limit(1001), DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn transfer_amount_validation() {
        assert!(validate_transfer_amount(&Money::new("QZN", 1)).is_ok());
        assert!(matches!(
            validate_transfer_amount(&Money::new("QZN", 0)),
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            validate_transfer_amount(&Money::new("QZN", -1)),
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            validate_transfer_amount(&Money::new("", 1)),
            Err(LedgerError::InvalidCurrency)
        ));
        assert!(matches!(
            validate_transfer_amount(&Money::new("TOOLONGCODE", 1)),
            Err(LedgerError::InvalidCurrency)
        ));
    }
}
