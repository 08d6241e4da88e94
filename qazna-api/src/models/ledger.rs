//! Core ledger entities. All monetary values are signed 64-bit integers in
//! minor units; no floats anywhere near money.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest accepted currency code.
pub const MAX_CURRENCY_LEN: usize = 8;
/// Longest accepted account identifier on the wire.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;
/// Longest accepted idempotency key on the wire.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// An amount of a single currency in minor units (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub currency: String,
    pub amount: i64,
}

impl Money {
    pub fn new(currency: impl Into<String>, amount: i64) -> Self {
        Self { currency: currency.into(), amount }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

/// Returns true when `code` is a well-formed currency code: 1–8 uppercase
/// ASCII letters or digits.
pub fn valid_currency(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CURRENCY_LEN
        && code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// An account with per-currency balances. Balances never go negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub balances: BTreeMap<String, i64>,
}

/// A committed transfer. Immutable once created; `sequence` is the global
/// commit order within one backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub from_account_id: String,
    pub to_account_id: String,
    pub currency: String,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub sequence: u64,
}
