//! Migration CLI: `qazna-migrate [up|down|seed|status]`.

use std::process::ExitCode;

use sqlx::postgres::PgPoolOptions;

use qazna_api::services::migrate::Runner;
use qazna_core::config::env_opt;

const USAGE: &str = "usage: qazna-migrate [up|down|seed|status]";
const DEFAULT_MIGRATIONS_DIR: &str = "qazna-api/migrations";
const DEFAULT_SEEDS_DIR: &str = "qazna-api/seeds";

#[tokio::main]
async fn main() -> ExitCode {
    let command = match std::env::args().nth(1) {
        Some(command) => command,
        None => {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let Some(dsn) = env_opt("QAZNA_PG_DSN") else {
        eprintln!("missing DSN: set QAZNA_PG_DSN");
        return ExitCode::FAILURE;
    };
    let migrations_dir =
        env_opt("QAZNA_MIGRATIONS_DIR").unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.to_string());
    let seeds_dir = env_opt("QAZNA_SEEDS_DIR").unwrap_or_else(|| DEFAULT_SEEDS_DIR.to_string());

    let pool = match PgPoolOptions::new().max_connections(2).connect(&dsn).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("open db: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runner = Runner::new(pool, migrations_dir, seeds_dir);
    let result = match command.as_str() {
        "up" => runner.up().await,
        "down" => runner.down().await,
        "seed" => runner.seed().await,
        "status" => match runner.status().await {
            Ok(history) => {
                for name in history {
                    println!("{name}");
                }
                Ok(())
            }
            Err(err) => Err(err),
        },
        other => {
            eprintln!("unknown command {other:?}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{command}: {err}");
            ExitCode::FAILURE
        }
    }
}
