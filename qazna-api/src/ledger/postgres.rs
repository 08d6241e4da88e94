//! PostgreSQL ledger backend with serializable transfer semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;

use qazna_core::ids;

use crate::context::RequestContext;
use crate::ledger::{clamp_limit, validate_transfer_amount, Ledger, LedgerError};
use crate::models::ledger::valid_currency;
use crate::models::{Account, Money, Transaction};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, sqlx::Error> {
    let sequence: i64 = row.try_get("sequence")?;
    let idempotency_key: Option<String> = row.try_get("idempotency_key")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        currency: row.try_get("currency")?,
        amount: row.try_get("amount")?,
        idempotency_key: idempotency_key.filter(|k| !k.is_empty()),
        sequence: sequence.max(0) as u64,
    })
}

#[async_trait]
impl Ledger for PgLedger {
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

        let id = ids::new_id();
        let mut tx = self.pool.begin().await?;

        let created_at: DateTime<Utc> = sqlx::query(
            "INSERT INTO accounts (id, created_at) VALUES ($1, now()) RETURNING created_at",
        )
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("created_at")
        .map_err(LedgerError::from)?;

        sqlx::query(
            "INSERT INTO balances (account_id, currency, amount)
             VALUES ($1, $2, $3)
             ON CONFLICT (account_id, currency) DO UPDATE
             SET amount = balances.amount + excluded.amount",
        )
        .bind(&id)
        .bind(&initial.currency)
        .bind(initial.amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Account {
            id,
            created_at,
            balances: BTreeMap::from([(initial.currency, initial.amount)]),
        })
    }

    async fn get_account(&self, _ctx: &RequestContext, id: &str) -> Result<Account, LedgerError> {
        let created_at: DateTime<Utc> =
            sqlx::query("SELECT created_at FROM accounts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(LedgerError::NotFound)?
                .try_get("created_at")
                .map_err(LedgerError::from)?;

        let rows = sqlx::query("SELECT currency, amount FROM balances WHERE account_id = $1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        let mut balances = BTreeMap::new();
        for row in rows {
            let currency: String = row.try_get("currency").map_err(LedgerError::from)?;
            let amount: i64 = row.try_get("amount").map_err(LedgerError::from)?;
            balances.insert(currency, amount);
        }

        Ok(Account { id: id.to_string(), created_at, balances })
    }

    async fn get_balance(
        &self,
        _ctx: &RequestContext,
        id: &str,
        currency: &str,
    ) -> Result<Money, LedgerError> {
        let row = sqlx::query(
            "SELECT coalesce(b.amount, 0) AS amount
             FROM accounts a
             LEFT JOIN balances b ON b.account_id = a.id AND b.currency = $2
             WHERE a.id = $1",
        )
        .bind(id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound)?;

        let amount: i64 = row.try_get("amount").map_err(LedgerError::from)?;
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
        let idempotency_key = idempotency_key.filter(|k| !k.is_empty());

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        if let Some(key) = idempotency_key {
            let existing = sqlx::query(
                "SELECT id, created_at, from_account_id, to_account_id, currency, amount,
                        sequence, idempotency_key
                 FROM transactions WHERE idempotency_key = $1",
            )
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = existing {
                return transaction_from_row(&row).map_err(LedgerError::from);
            }
        }

        // Lock both account rows in lexicographic order to avoid deadlocks.
        let mut locked = [from_id, to_id];
        locked.sort_unstable();
        for account_id in locked {
            let row = sqlx::query("SELECT 1 FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;
            if row.is_none() {
                return Err(LedgerError::NotFound);
            }
        }

        for account_id in [from_id, to_id] {
            sqlx::query(
                "INSERT INTO balances (account_id, currency, amount)
                 VALUES ($1, $2, 0) ON CONFLICT DO NOTHING",
            )
            .bind(account_id)
            .bind(&amount.currency)
            .execute(&mut *tx)
            .await?;
        }

        let from_balance: i64 = sqlx::query(
            "SELECT amount FROM balances WHERE account_id = $1 AND currency = $2 FOR UPDATE",
        )
        .bind(from_id)
        .bind(&amount.currency)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::NotFound)?
        .try_get("amount")
        .map_err(LedgerError::from)?;

        if from_balance < amount.amount {
            return Err(LedgerError::InsufficientFunds);
        }

        sqlx::query(
            "UPDATE balances SET amount = amount - $3
             WHERE account_id = $1 AND currency = $2",
        )
        .bind(from_id)
        .bind(&amount.currency)
        .bind(amount.amount)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE balances SET amount = amount + $3
             WHERE account_id = $1 AND currency = $2",
        )
        .bind(to_id)
        .bind(&amount.currency)
        .bind(amount.amount)
        .execute(&mut *tx)
        .await?;

        let id = ids::new_id();
        let row = sqlx::query(
            "INSERT INTO transactions
                 (id, from_account_id, to_account_id, currency, amount, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, nullif($6, ''))
             RETURNING created_at, sequence",
        )
        .bind(&id)
        .bind(from_id)
        .bind(to_id)
        .bind(&amount.currency)
        .bind(amount.amount)
        .bind(idempotency_key.unwrap_or(""))
        .fetch_one(&mut *tx)
        .await?;

        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(LedgerError::from)?;
        let sequence: i64 = row.try_get("sequence").map_err(LedgerError::from)?;

        tx.commit().await?;

        Ok(Transaction {
            id,
            created_at,
            from_account_id: from_id.to_string(),
            to_account_id: to_id.to_string(),
            currency: amount.currency,
            amount: amount.amount,
            idempotency_key: idempotency_key.map(ToString::to_string),
            sequence: sequence.max(0) as u64,
        })
    }

    async fn list_transactions(
        &self,
        _ctx: &RequestContext,
        limit: usize,
        after_seq: u64,
    ) -> Result<(Vec<Transaction>, u64), LedgerError> {
        let limit = clamp_limit(limit);
        let rows = sqlx::query(
            "SELECT id, created_at, from_account_id, to_account_id, currency, amount,
                    sequence, idempotency_key
             FROM transactions
             WHERE sequence > $1
             ORDER BY sequence ASC
             LIMIT $2",
        )
        .bind(after_seq as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut last = 0;
        for row in &rows {
            let tx = transaction_from_row(row).map_err(LedgerError::from)?;
            last = tx.sequence;
            items.push(tx);
        }
        Ok((items, last))
    }
}
