use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use payment_gateway::adapters::PostgresTransactionRepository;
use payment_gateway::cli::{Cli, Commands, DbCommands, TxCommands};
use payment_gateway::config::{Config, LogFormat};
use payment_gateway::gateways::GatewayRegistry;
use payment_gateway::services::SignatureVerifier;
use payment_gateway::{cli, create_app, db, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Tx(TxCommands::Show { transaction_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_tx_show(&pool, &transaction_id).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let gateways = GatewayRegistry::from_config(&config);
    if gateways.providers().is_empty() {
        tracing::warn!("no payment gateway is configured, deposits and withdrawals will fail");
    }
    for provider in gateways.providers() {
        tracing::info!(provider = %provider, "payment gateway enabled");
    }

    let verifier = SignatureVerifier::new(
        config.stripe_endpoint_secret.clone(),
        config.authorize_webhook_signature_key.clone(),
        config.webhook_tolerance(),
    );

    let state = AppState::new(
        Arc::new(PostgresTransactionRepository::new(pool)),
        gateways,
        config.retry_policy(),
        verifier,
    );
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
