//! Smoke test against a running ledger: two accounts, one transfer, and a
//! conservation check over the remote gRPC backend.

use std::process::ExitCode;

use rand::{Rng, SeedableRng};

use qazna_api::context::RequestContext;
use qazna_api::ledger::remote::RemoteLedger;
use qazna_api::ledger::Ledger;
use qazna_api::models::Money;
use qazna_core::config::env_string;

const SEED_AMOUNT: i64 = 1_000;
const TRANSFER_AMOUNT: i64 = 420;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let addr = env_string("QAZNA_LEDGER_GRPC_ADDR", "localhost:9091");
    let ledger = RemoteLedger::connect(&addr)
        .await
        .map_err(|e| format!("dial ledger at {addr}: {e}"))?;
    let ctx = RequestContext::default();

    // Seeded locally so idempotency keys never collide across runs while
    // staying reproducible under a pinned seed.
    let seed = std::env::var("QAZNA_SMOKE_SEED")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
        });
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let account_a = ledger
        .create_account(&ctx, Money::new("QZN", SEED_AMOUNT))
        .await
        .map_err(|e| format!("create account A: {e}"))?;
    let account_b = ledger
        .create_account(&ctx, Money::new("QZN", 0))
        .await
        .map_err(|e| format!("create account B: {e}"))?;

    let idempotency_key = format!("smoke-{}", rng.gen::<u64>());
    ledger
        .transfer(
            &ctx,
            &account_a.id,
            &account_b.id,
            Money::new("QZN", TRANSFER_AMOUNT),
            Some(&idempotency_key),
        )
        .await
        .map_err(|e| format!("transfer: {e}"))?;

    let balance_a = ledger
        .get_balance(&ctx, &account_a.id, "QZN")
        .await
        .map_err(|e| format!("balance A: {e}"))?;
    let balance_b = ledger
        .get_balance(&ctx, &account_b.id, "QZN")
        .await
        .map_err(|e| format!("balance B: {e}"))?;

    if balance_a.amount + balance_b.amount != SEED_AMOUNT {
        return Err(format!(
            "ledger conservation failed: {} + {}",
            balance_a.amount, balance_b.amount
        ));
    }
    if balance_a.amount != SEED_AMOUNT - TRANSFER_AMOUNT || balance_b.amount != TRANSFER_AMOUNT {
        return Err(format!(
            "unexpected balances: A={} B={}",
            balance_a.amount, balance_b.amount
        ));
    }

    println!("ledger smoke test passed: accounts={},{}", account_a.id, account_b.id);
    Ok(())
}
