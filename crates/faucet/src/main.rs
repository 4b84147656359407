//! Faucet service binary

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use multifaucet::api::router;
use multifaucet::{
    DistributionLedger, Dispatcher, FaucetMetrics, FileConfig, FleetConfig, HCaptchaVerifier, NetworkCatalog,
    RpcTransactionSender, TransactionSender,
};
use multifaucet_common::utils::{config::load_config, logging::init_logging};
use multifaucet_crypto::{encrypt_key, read_password_file, KeyPair};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

const ENV_PREFIX: &str = "MULTIFAUCET";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        return run_command(command);
    }

    let mut file = match &cli.config {
        Some(path) => load_config::<FileConfig, _>(path, ENV_PREFIX)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => cli.pool.into_file_config(),
    };
    if let Some(port) = cli.port {
        file.http_port = port;
    }
    if cli.debug {
        file.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&file.logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting multifaucet v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(NetworkCatalog::builtin());
    let fleet = FleetConfig::from_file_config(&file, catalog)?;
    let port = fleet.listen_port;
    if !fleet.verification.is_enabled() {
        warn!("No hCaptcha secret configured, human verification is disabled");
    }

    let metrics = Arc::new(FaucetMetrics::new()?);
    let mut builder = Dispatcher::builder(fleet)
        .verifier(Arc::new(HCaptchaVerifier::new()))
        .metrics(metrics)
        .send_timeout(file.send_timeout())
        .claims_per_minute(file.global_claims_per_minute.unwrap_or(0));

    let ledger = match &file.ledger_path {
        Some(path) => {
            let ledger = Arc::new(DistributionLedger::open(path)?);
            builder = builder.ledger(ledger.clone());
            Some(ledger)
        }
        None => None,
    };

    let dispatcher = Arc::new(builder.build(|pool| -> Arc<dyn TransactionSender> {
        Arc::new(RpcTransactionSender::new(&pool.endpoint, pool.network.chain_id))
    }));

    let mismatched = dispatcher.mismatched_chains().await;
    if !mismatched.is_empty() {
        anyhow::bail!("endpoints for {} serve a different chain", mismatched.join(", "));
    }

    let networks = dispatcher.networks();
    info!(
        networks = ?networks.networks,
        default = ?networks.default,
        "Faucet pools ready"
    );

    // Expired cooldown sweep
    let sweeper = dispatcher.clone();
    let sweep_interval = file.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let removed = sweeper.sweep_expired();
            if removed > 0 {
                debug!(removed, "Swept expired cooldowns");
            }
        }
    });

    // Daily ledger cleanup
    if ledger.is_some() {
        let cleaner = dispatcher.clone();
        let retention_days = file.ledger_retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(86400));
            loop {
                interval.tick().await;
                if let Err(e) = cleaner.cleanup_ledger(retention_days) {
                    warn!(error = %e, "Ledger cleanup failed");
                }
            }
        });
    }

    let app = router(dispatcher, file.cors_enabled);
    if file.cors_enabled {
        info!("CORS enabled");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(ledger) = ledger {
        if let Err(e) = ledger.flush() {
            warn!(error = %e, "Failed to flush ledger");
        }
    }
    info!("Shutting down gracefully");
    Ok(())
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::ListNetworks => {
            for network in NetworkCatalog::builtin().all() {
                println!(
                    "{:<18} {:>10}  {:<5} {:<8} {}",
                    network.name,
                    network.chain_id,
                    network.symbol,
                    if network.is_testnet { "testnet" } else { "mainnet" },
                    network.display_name
                );
            }
        }
        Commands::GenerateConfig { out } => {
            let sample = serde_json::to_string_pretty(&FileConfig::sample())?;
            match out {
                Some(path) => {
                    std::fs::write(&path, sample).with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Wrote sample configuration to {}", path.display());
                }
                None => println!("{}", sample),
            }
        }
        Commands::EncryptKey {
            private_key,
            password_file,
            out,
        } => {
            let pair = KeyPair::from_private_key_hex(&private_key)?;
            let password = read_password_file(&password_file)?;
            encrypt_key(&pair, &password)?.write(&out)?;
            println!("Wrote key file for {} to {}", pair.address(), out.display());
        }
    }
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
