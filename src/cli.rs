use clap::{Parser, Subcommand};
use sqlx::PgPool;

use crate::adapters::PostgresTransactionRepository;
use crate::config::Config;
use crate::ports::TransactionRepository;

#[derive(Parser)]
#[command(name = "payment-gateway")]
#[command(about = "Payment Gateway - deposit, withdrawal and webhook reconciliation service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction inspection commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a stored transaction as JSON
    Show {
        /// External transaction id
        #[arg(value_name = "TRANSACTION_ID")]
        transaction_id: String,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_show(pool: &PgPool, transaction_id: &str) -> anyhow::Result<()> {
    let repository = PostgresTransactionRepository::new(pool.clone());
    match repository.find_by_transaction_id(transaction_id).await? {
        Some(tx) => {
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
        None => {
            tracing::warn!(transaction_id = %transaction_id, "transaction not found");
            anyhow::bail!("Transaction {} not found", transaction_id)
        }
    }
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Stripe API Base: {}", config.stripe_api_base);
    println!("  Stripe Enabled: {}", config.stripe_secret_key.is_some());
    println!("  Authorize.Net Endpoint: {}", config.authorize_endpoint);
    println!(
        "  Authorize.Net Enabled: {}",
        config.authorize_login_id.is_some() && config.authorize_transaction_key.is_some()
    );
    println!(
        "  Retry: {} attempts, {}ms base delay",
        config.retry_max_attempts, config.retry_base_delay_ms
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::validate_environment(config, &pool).await?;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }
    tracing::info!("Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
