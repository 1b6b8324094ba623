use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub gateways: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.gateways
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Gateway Endpoints:     {}", status(self.gateways));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        gateways: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_gateway_urls(config) {
        report.gateways = false;
        report.errors.push(format!("Gateways: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.stripe_secret_key.is_none()
        && (config.authorize_login_id.is_none() || config.authorize_transaction_key.is_none())
    {
        anyhow::bail!("no payment gateway credentials are configured");
    }
    if config.stripe_secret_key.is_some() && config.stripe_endpoint_secret.is_none() {
        anyhow::bail!("STRIPE_ENDPOINT_SECRET is required to accept Stripe webhooks");
    }
    if config.authorize_login_id.is_some() && config.authorize_webhook_signature_key.is_none() {
        anyhow::bail!(
            "AUTHORIZE_NET_WEBHOOK_SIGNATURE_KEY is required to accept Authorize.Net webhooks"
        );
    }
    Ok(())
}

fn validate_gateway_urls(config: &Config) -> Result<()> {
    for (name, value) in [
        ("STRIPE_API_BASE", &config.stripe_api_base),
        ("AUTHORIZE_ENDPOINT", &config.authorize_endpoint),
    ] {
        let url = url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!("{} must use http or https", name);
        }
    }
    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}
