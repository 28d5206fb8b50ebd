// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use task_reward_server::{
    api::{self, admin::init_server_start_time},
    blockchain::{signing::signer_from_hex, EvmLedgerClient, EvmLedgerConfig, LedgerClient},
    config::{AppConfig, LedgerMode, LogFormat, KEY_ENCRYPTION_KEY_ENV, MINTER_PRIVATE_KEY_ENV},
    custody::{KeyVault, MasterKey},
    settlement::Reconciler,
    state::AppState,
    storage::{RewardDatabase, DATABASE_FILE},
    tasks::TaskCatalog,
};

const DEFAULT_TOKEN_DECIMALS: u8 = 18;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

type StartupResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format);

    if let Err(e) = run(config).await {
        error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(config: AppConfig) -> StartupResult<()> {
    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }
    init_server_start_time();

    let master_key = MasterKey::from_env(KEY_ENCRYPTION_KEY_ENV)?;
    let db = Arc::new(RewardDatabase::open(&config.data_dir.join(DATABASE_FILE))?);
    info!(path = %config.data_dir.display(), "Reward database opened");

    let (ledger, token_decimals) = connect_ledger(&config).await?;

    let catalog = match &config.task_catalog_path {
        Some(path) => TaskCatalog::load(path, token_decimals)?,
        None => TaskCatalog::builtin(token_decimals)?,
    };
    info!(
        tasks = catalog.len(),
        token_decimals,
        symbol = %config.token_symbol,
        "Task catalog loaded"
    );

    let state = AppState::assemble(
        &config,
        db,
        ledger,
        KeyVault::new(master_key),
        catalog,
        token_decimals,
    );
    if !state.auth_config.is_production() {
        warn!("SESSION_JWT_SECRET is not set: session token signatures are NOT verified");
    }

    let shutdown = CancellationToken::new();
    let reconciler = Reconciler::new(state.engine.clone()).with_interval(config.reconcile_interval);
    let reconciler_task = tokio::spawn(reconciler.run(shutdown.clone()));

    let app = api::router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn(watch_shutdown(handle.clone(), shutdown.clone()));

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            info!(%addr, network = %config.network.name, "Listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!(%addr, network = %config.network.name, "Listening on http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = reconciler_task.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }
    info!("Server stopped");
    Ok(())
}

async fn connect_ledger(config: &AppConfig) -> StartupResult<(Arc<dyn LedgerClient>, u8)> {
    match config.ledger_mode {
        LedgerMode::Evm => {
            let token_address = config
                .reward_token_address
                .clone()
                .ok_or("REWARD_TOKEN_ADDRESS is required in evm ledger mode")?;
            let minter_key = std::env::var(MINTER_PRIVATE_KEY_ENV)
                .map_err(|_| format!("{MINTER_PRIVATE_KEY_ENV} is required in evm ledger mode"))?;

            let client = EvmLedgerClient::new(
                EvmLedgerConfig {
                    network: config.network.clone(),
                    token_address,
                    account_gas_stipend: config.account_gas_stipend,
                },
                signer_from_hex(&minter_key)?,
            )?;
            info!(
                network = %config.network.name,
                chain_id = config.network.chain_id,
                minter = %client.operator_address(),
                "EVM ledger client ready"
            );

            let decimals = match config.token_decimals {
                Some(decimals) => decimals,
                None => match client.token_decimals().await {
                    Ok(decimals) => decimals,
                    Err(e) => {
                        warn!(error = %e, assumed = DEFAULT_TOKEN_DECIMALS, "Could not read token decimals");
                        DEFAULT_TOKEN_DECIMALS
                    }
                },
            };
            Ok((Arc::new(client), decimals))
        }
        LedgerMode::Memory => memory_ledger(config),
    }
}

#[cfg(feature = "dev")]
fn memory_ledger(config: &AppConfig) -> StartupResult<(Arc<dyn LedgerClient>, u8)> {
    warn!("Using the in-memory ledger: rewards are NOT settled on a real network");
    let decimals = config.token_decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS);
    Ok((Arc::new(task_reward_server::blockchain::InMemoryLedger::new()), decimals))
}

#[cfg(not(feature = "dev"))]
fn memory_ledger(_config: &AppConfig) -> StartupResult<(Arc<dyn LedgerClient>, u8)> {
    Err("LEDGER_MODE=memory requires a build with the `dev` feature".into())
}

async fn watch_shutdown(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
