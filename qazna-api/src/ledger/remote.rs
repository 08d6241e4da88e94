//! Remote ledger backend proxying to a standalone ledger over gRPC.
//! Caller identity from the request context is relayed as metadata.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use crate::context::RequestContext;
use crate::grpc::proto::qazna::v1 as pb;
use crate::grpc::proto::qazna::v1::ledger_service_client::LedgerServiceClient;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{Account, Money, Transaction};

pub const USER_ID_METADATA_KEY: &str = "x-qazna-user-id";
pub const ROLES_METADATA_KEY: &str = "x-qazna-roles";

pub struct RemoteLedger {
    client: LedgerServiceClient<Channel>,
}

impl RemoteLedger {
    /// Dial the remote ledger. Plain `host:port` targets get an `http`
    /// scheme prefixed.
    pub async fn connect(target: &str) -> Result<Self, LedgerError> {
        let target = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{target}")
        };
        let channel = Endpoint::from_shared(target)
            .map_err(|e| LedgerError::Unavailable(anyhow::Error::new(e)))?
            .connect()
            .await
            .map_err(|e| LedgerError::Unavailable(anyhow::Error::new(e)))?;
        Ok(Self { client: LedgerServiceClient::new(channel) })
    }

    fn request_with_identity<T>(ctx: &RequestContext, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(user_id) = ctx.user_id() {
            if let Ok(value) = user_id.parse() {
                request.metadata_mut().insert(USER_ID_METADATA_KEY, value);
            }
        }
        let roles = ctx.roles();
        if !roles.is_empty() {
            if let Ok(value) = roles.join(",").parse() {
                request.metadata_mut().insert(ROLES_METADATA_KEY, value);
            }
        }
        request
    }
}

fn from_status(status: Status) -> LedgerError {
    match status.code() {
        Code::NotFound => LedgerError::NotFound,
        Code::FailedPrecondition => LedgerError::InsufficientFunds,
        Code::InvalidArgument => {
            if status.message().contains("currency") {
                LedgerError::InvalidCurrency
            } else {
                LedgerError::InvalidAmount
            }
        }
        Code::Unavailable => LedgerError::Unavailable(anyhow::anyhow!(status.to_string())),
        _ => LedgerError::Storage(anyhow::anyhow!(status.to_string())),
    }
}

fn from_proto_timestamp(ts: Option<prost_types::Timestamp>) -> DateTime<Utc> {
    ts.and_then(|t| Utc.timestamp_opt(t.seconds, t.nanos.max(0) as u32).single())
        .unwrap_or_else(Utc::now)
}

fn from_proto_account(account: pb::Account) -> Account {
    let balances: BTreeMap<String, i64> =
        account.balances.into_iter().map(|b| (b.currency, b.amount)).collect();
    Account {
        id: account.id,
        created_at: from_proto_timestamp(account.created_at),
        balances,
    }
}

fn from_proto_transaction(tx: pb::Transaction) -> Transaction {
    Transaction {
        id: tx.id,
        created_at: from_proto_timestamp(tx.created_at),
        from_account_id: tx.from_account_id,
        to_account_id: tx.to_account_id,
        currency: tx.currency,
        amount: tx.amount,
        idempotency_key: if tx.idempotency_key.is_empty() {
            None
        } else {
            Some(tx.idempotency_key)
        },
        sequence: tx.sequence,
    }
}

#[async_trait]
impl Ledger for RemoteLedger {
    async fn create_account(
        &self,
        ctx: &RequestContext,
        initial: Money,
    ) -> Result<Account, LedgerError> {
        let mut client = self.client.clone();
        let response = client
            .create_account(Self::request_with_identity(
                ctx,
                pb::CreateAccountRequest {
                    currency: initial.currency,
                    initial_amount: initial.amount,
                },
            ))
            .await
            .map_err(from_status)?;
        Ok(from_proto_account(response.into_inner()))
    }

    async fn get_account(&self, ctx: &RequestContext, id: &str) -> Result<Account, LedgerError> {
        let mut client = self.client.clone();
        let response = client
            .get_account(Self::request_with_identity(ctx, pb::GetAccountRequest {
                id: id.to_string(),
            }))
            .await
            .map_err(from_status)?;
        Ok(from_proto_account(response.into_inner()))
    }

    async fn get_balance(
        &self,
        ctx: &RequestContext,
        id: &str,
        currency: &str,
    ) -> Result<Money, LedgerError> {
        let mut client = self.client.clone();
        let response = client
            .get_balance(Self::request_with_identity(ctx, pb::GetBalanceRequest {
                id: id.to_string(),
                currency: currency.to_string(),
            }))
            .await
            .map_err(from_status)?;
        let balance = response.into_inner();
        Ok(Money::new(balance.currency, balance.amount))
    }

    async fn transfer(
        &self,
        ctx: &RequestContext,
        from_id: &str,
        to_id: &str,
        amount: Money,
        idempotency_key: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let mut client = self.client.clone();
        let response = client
            .transfer(Self::request_with_identity(ctx, pb::TransferRequest {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                currency: amount.currency,
                amount: amount.amount,
                idempotency_key: idempotency_key.unwrap_or_default().to_string(),
            }))
            .await
            .map_err(from_status)?;
        response
            .into_inner()
            .transaction
            .map(from_proto_transaction)
            .ok_or_else(|| LedgerError::Storage(anyhow::anyhow!("transfer response missing transaction")))
    }

    async fn list_transactions(
        &self,
        ctx: &RequestContext,
        limit: usize,
        after_seq: u64,
    ) -> Result<(Vec<Transaction>, u64), LedgerError> {
        let mut client = self.client.clone();
        let response = client
            .list_transactions(Self::request_with_identity(ctx, pb::ListTransactionsRequest {
                after_sequence: after_seq,
                limit: limit as u32,
            }))
            .await
            .map_err(from_status)?;
        let body = response.into_inner();
        let items = body.items.into_iter().map(from_proto_transaction).collect();
        Ok((items, body.next_after))
    }
}
