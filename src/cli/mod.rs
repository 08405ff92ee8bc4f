// CLI - operator commands against a local wallet store

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::json;
use std::path::PathBuf;

use crate::app::{Config, EnvOverride, WalletService};
use crate::gateway::Gateways;
use crate::ledger::Transaction;
use crate::primitives::{AccountOwner, Currency, IdempotencyKey, UserId};
use crate::settings::{AdminCaller, CurrencyLimitsPatch, SettingsPatch};

#[derive(Parser)]
#[clap(version, long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[clap(short, long, env = "GIGWALLET_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
    /// Directory of the wallet store, overrides the config file
    #[clap(long, env = "GIGWALLET_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or change commission settings
    Settings {
        #[clap(subcommand)]
        command: SettingsCommand,
    },
    /// Balance of a user's wallet
    Balance {
        #[clap(short, long)]
        user: UserId,
        #[clap(short, long)]
        currency: Currency,
    },
    /// Commission accrued by the platform
    Revenue {
        /// Every currency when omitted
        #[clap(short, long)]
        currency: Option<Currency>,
    },
    /// Newest transactions of a wallet
    History {
        #[clap(short, long)]
        user: UserId,
        #[clap(short, long)]
        currency: Currency,
        #[clap(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Move funds between two users
    Transfer {
        #[clap(long)]
        from: UserId,
        #[clap(long)]
        to: UserId,
        #[clap(short, long)]
        amount: Decimal,
        #[clap(short, long)]
        currency: Currency,
        /// Repeat a transfer safely by reusing its key
        #[clap(long)]
        idempotency_key: Option<String>,
    },
    /// Fail pending deposits older than the pending timeout
    Sweep,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        /// Admin identity already verified by the caller
        #[clap(long, env = "GIGWALLET_ADMIN")]
        admin: UserId,
        #[clap(long)]
        percentage: Option<String>,
        #[clap(long)]
        on_deposits: Option<bool>,
        #[clap(long)]
        on_transfers: Option<bool>,
        #[clap(long)]
        crypto_decimals: Option<u32>,
        /// Currency the limit flags below apply to
        #[clap(long)]
        currency: Option<Currency>,
        #[clap(long, requires = "currency")]
        min_deposit: Option<String>,
        #[clap(long, requires = "currency")]
        max_deposit: Option<String>,
        #[clap(long, requires = "currency")]
        min_withdrawal: Option<String>,
        #[clap(long, requires = "currency")]
        max_withdrawal: Option<String>,
        #[clap(long, requires = "currency")]
        wallet_enabled: Option<bool>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let overrides = EnvOverride {
        data_dir: cli.data_dir,
    };
    let config = match cli.config {
        Some(path) => Config::from_path(path, overrides)?,
        None => Config::default().with_overrides(overrides),
    };
    crate::tracing::init_tracing(&config.tracing)?;

    let service =
        WalletService::open(config, Gateways::new()).context("Couldn't open wallet store")?;
    let output = execute(&service, cli.command).await?;
    service.flush()?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute(service: &WalletService, command: Command) -> anyhow::Result<serde_json::Value> {
    let output = match command {
        Command::Settings {
            command: SettingsCommand::Show,
        } => serde_json::to_value(&*service.settings().get())?,
        Command::Settings {
            command:
                SettingsCommand::Set {
                    admin,
                    percentage,
                    on_deposits,
                    on_transfers,
                    crypto_decimals,
                    currency,
                    min_deposit,
                    max_deposit,
                    min_withdrawal,
                    max_withdrawal,
                    wallet_enabled,
                },
        } => {
            let mut patch = SettingsPatch {
                percentage,
                on_deposits,
                on_transfers,
                crypto_decimals,
                ..SettingsPatch::default()
            };
            if let Some(currency) = currency {
                let limits = CurrencyLimitsPatch {
                    min_deposit,
                    max_deposit,
                    min_withdrawal,
                    max_withdrawal,
                    wallet_enabled,
                };
                patch = patch.with_currency(currency, limits);
            }
            anyhow::ensure!(!patch.is_empty(), "Nothing to change");

            let updated = service
                .settings()
                .set(&AdminCaller::verified(admin), &patch)
                .await?;
            serde_json::to_value(&*updated)?
        }
        Command::Balance { user, currency } => {
            let balance = service.balance(&user, currency)?;
            json!({ "user": user.as_str(), "currency": currency, "balance": balance.to_string() })
        }
        Command::Revenue { currency } => {
            let currencies = match currency {
                Some(currency) => vec![currency],
                None => Currency::ALL.to_vec(),
            };
            let mut revenue = serde_json::Map::new();
            for currency in currencies {
                revenue.insert(
                    currency.code().to_string(),
                    json!(service.revenue(currency)?.to_string()),
                );
            }
            serde_json::Value::Object(revenue)
        }
        Command::History {
            user,
            currency,
            limit,
        } => {
            let transactions = service
                .history(&AccountOwner::User(user), currency)
                .with_page_size(limit)
                .take(limit)
                .collect::<Result<Vec<Transaction>, _>>()?;
            serde_json::to_value(transactions)?
        }
        Command::Transfer {
            from,
            to,
            amount,
            currency,
            idempotency_key,
        } => {
            let key = match idempotency_key {
                Some(key) => IdempotencyKey::new(key)?,
                None => IdempotencyKey::generate(),
            };
            let (out, incoming) = service.transfer(&from, &to, amount, currency, key).await?;
            json!({ "transfer_out": out, "transfer_in": incoming })
        }
        Command::Sweep => {
            let report = service.worker().sweep_stale_pending(Utc::now()).await?;
            json!({ "examined": report.examined, "failed": report.failed })
        }
    };
    Ok(output)
}
