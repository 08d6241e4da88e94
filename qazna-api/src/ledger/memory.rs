//! In-memory ledger backend. A single mutex guards the whole state; suited
//! to tests and DSN-less deployments, not durable.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use qazna_core::ids;

use crate::context::RequestContext;
use crate::ledger::{clamp_limit, validate_transfer_amount, Ledger, LedgerError};
use crate::models::ledger::valid_currency;
use crate::models::{Account, Money, Transaction};

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    idempotency: HashMap<String, Transaction>,
    log: Vec<Transaction>,
    sequence: u64,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_account(
        &self,
        _ctx: &RequestContext,
        initial: Money,
    ) -> Result<Account, LedgerError> {
        if !valid_currency(&initial.currency) {
            return Err(LedgerError::InvalidCurrency);
        }
        if initial.amount < 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.lock();
        let account = Account {
            id: ids::new_id(),
            created_at: Utc::now(),
            balances: BTreeMap::from([(initial.currency, initial.amount)]),
        };
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn get_account(&self, _ctx: &RequestContext, id: &str) -> Result<Account, LedgerError> {
        let state = self.lock();
        state.accounts.get(id).cloned().ok_or(LedgerError::NotFound)
    }

    async fn get_balance(
        &self,
        _ctx: &RequestContext,
        id: &str,
        currency: &str,
    ) -> Result<Money, LedgerError> {
        let state = self.lock();
        let account = state.accounts.get(id).ok_or(LedgerError::NotFound)?;
        let amount = account.balances.get(currency).copied().unwrap_or(0);
        Ok(Money::new(currency, amount))
    }

    async fn transfer(
        &self,
        _ctx: &RequestContext,
        from_id: &str,
        to_id: &str,
        amount: Money,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        validate_transfer_amount(&amount)?;

        let mut state = self.lock();

        if let Some(key) = idempotency_key.filter(|k| !k.is_empty()) {
            if let Some(tx) = state.idempotency.get(key) {
                return Ok(tx.clone());
            }
        }

        if !state.accounts.contains_key(from_id) || !state.accounts.contains_key(to_id) {
            return Err(LedgerError::NotFound);
        }

        let from_balance = state
            .accounts
            .get(from_id)
            .and_then(|acc| acc.balances.get(&amount.currency).copied())
            .unwrap_or(0);
        if from_balance < amount.amount {
            return Err(LedgerError::InsufficientFunds);
        }

        // Self-transfer nets to zero but still records a transaction.
        if let Some(from) = state.accounts.get_mut(from_id) {
            *from.balances.entry(amount.currency.clone()).or_insert(0) -= amount.amount;
        }
        if let Some(to) = state.accounts.get_mut(to_id) {
            *to.balances.entry(amount.currency.clone()).or_insert(0) += amount.amount;
        }

        state.sequence += 1;
        let tx = Transaction {
            id: ids::new_id(),
            created_at: Utc::now(),
            from_account_id: from_id.to_string(),
            to_account_id: to_id.to_string(),
            currency: amount.currency.clone(),
            amount: amount.amount,
            idempotency_key: idempotency_key.filter(|k| !k.is_empty()).map(ToString::to_string),
            sequence: state.sequence,
        };
        state.log.push(tx.clone());
        if let Some(key) = &tx.idempotency_key {
            state.idempotency.insert(key.clone(), tx.clone());
        }
        Ok(tx)
    }

    async fn list_transactions(
        &self,
        _ctx: &RequestContext,
        limit: usize,
        after_seq: u64,
    ) -> Result<(Vec<Transaction>, u64), LedgerError> {
        let limit = clamp_limit(limit);
        let state = self.lock();

        let mut items = Vec::new();
        let mut last = 0;
        for tx in &state.log {
            if tx.sequence <= after_seq {
                continue;
            }
            last = tx.sequence;
            items.push(tx.clone());
            if items.len() >= limit {
                break;
            }
        }
        Ok((items, last))
    }
}
