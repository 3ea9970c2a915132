//! Application entry point.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use interaction_relayer::api::{RateLimitConfig, create_router, create_router_with_rate_limit};
use interaction_relayer::app::{
    AppState, BatchExecutor, ExecuteConfig, ExecuteJob, ExecutorConfig, InteractionSigner,
    InteractionSimulator, JobConfig, JobScheduler, RetrySweepConfig, RetrySweepJob, Signal,
    SignalBus, SimulateConfig, SimulateJob,
};
use interaction_relayer::domain::InteractionChain;
use interaction_relayer::infra::{
    DerivedSignerResolver, OnChainContractResolver, OnChainSessionOracle, PostgresClient,
    PostgresConfig, RpcChainClient, RpcClientConfig, SessionOracleConfig,
};

/// Application configuration
struct Config {
    database_url: String,
    rpc_url: String,
    /// Known chain id, fetched from the node when unset
    chain_id: Option<u64>,
    master_key: SecretString,
    delegator: Address,
    interaction_manager: Address,
    /// Executor a wallet session must delegate to
    delegator_action: Address,
    /// Validator a wallet session must delegate to
    delegator_validator: Address,
    host: String,
    port: u16,
    enable_rate_limiting: bool,
    rate_limit_config: RateLimitConfig,
    enable_jobs: bool,
    simulate_interval: Duration,
    execute_interval: Duration,
    retry_interval: Duration,
    execute_batch_size: i64,
    /// Archive failure rows older than this many days, unset keeps them on their budget
    archive_after_days: Option<u64>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
        let master_key = env::var("MASTER_PRIVATE_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .context("MASTER_PRIVATE_KEY not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Ok(Self {
            database_url,
            rpc_url,
            chain_id: parse_opt("CHAIN_ID"),
            master_key,
            delegator: required_address("INTERACTION_DELEGATOR_ADDRESS")?,
            interaction_manager: required_address("INTERACTION_MANAGER_ADDRESS")?,
            delegator_action: required_address("DELEGATOR_ACTION_ADDRESS")?,
            delegator_validator: required_address("DELEGATOR_VALIDATOR_ADDRESS")?,
            host,
            port,
            enable_rate_limiting: flag("ENABLE_RATE_LIMITING", false),
            rate_limit_config: RateLimitConfig::from_env(),
            enable_jobs: flag("ENABLE_JOBS", true),
            simulate_interval: Duration::from_secs(parse_opt("SIMULATE_INTERVAL_SECS").unwrap_or(30)),
            execute_interval: Duration::from_secs(parse_opt("EXECUTE_INTERVAL_SECS").unwrap_or(180)),
            retry_interval: Duration::from_secs(parse_opt("RETRY_INTERVAL_SECS").unwrap_or(300)),
            execute_batch_size: parse_opt("EXECUTE_BATCH_SIZE").unwrap_or(200),
            archive_after_days: parse_opt("ARCHIVE_AFTER_DAYS"),
        })
    }
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn parse_opt<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn required_address(key: &str) -> Result<Address> {
    let raw = env::var(key).with_context(|| format!("{} not set", key))?;
    Address::from_str(raw.trim()).with_context(|| format!("{} is not a valid address", key))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Starting interaction relayer");

    let config = Config::from_env().context("Failed to load configuration")?;

    let postgres = PostgresClient::new(&config.database_url, PostgresConfig::default())
        .await
        .context("Failed to connect to database")?;
    postgres
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    info!("   ✓ Database connected and migrated");
    let store = Arc::new(postgres);

    let chain = Arc::new(
        RpcChainClient::new(
            &config.rpc_url,
            RpcClientConfig {
                chain_id: config.chain_id,
                ..RpcClientConfig::default()
            },
        )
        .context("Failed to create RPC client")?,
    );
    let chain_id = chain.chain_id().await.context("Failed to read chain id")?;
    info!(chain_id, rpc = %config.rpc_url, "   ✓ RPC client initialized");

    let signers = Arc::new(
        DerivedSignerResolver::new(&config.master_key).context("Invalid MASTER_PRIVATE_KEY")?,
    );
    let resolver = Arc::new(OnChainContractResolver::new(
        chain.clone(),
        config.interaction_manager,
    ));
    let sessions = Arc::new(OnChainSessionOracle::new(
        chain.clone(),
        SessionOracleConfig::new(
            config.delegator,
            config.delegator_action,
            config.delegator_validator,
        ),
    ));

    let signals = Arc::new(SignalBus::new());
    let app_state = AppState::new(store.clone(), chain.clone(), signals.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (app_state, job_handles) = if config.enable_jobs {
        let simulator = Arc::new(InteractionSimulator::new(chain.clone(), resolver.clone()));
        let signer = Arc::new(InteractionSigner::new(
            chain.clone(),
            resolver.clone(),
            signers.clone(),
        ));
        let executor = Arc::new(BatchExecutor::new(
            chain.clone(),
            signers.clone(),
            ExecutorConfig {
                delegator: config.delegator,
                ..ExecutorConfig::default()
            },
        ));

        let mut scheduler = JobScheduler::new(signals.clone());
        scheduler.register(
            Arc::new(SimulateJob::new(
                store.clone(),
                sessions,
                simulator,
                signals.clone(),
                SimulateConfig::default(),
            )),
            JobConfig::every(config.simulate_interval)
                .wake_on(Signal::NewInteractions)
                .cool_down(Duration::from_secs(5)),
        );
        scheduler.register(
            Arc::new(ExecuteJob::new(
                store.clone(),
                signer,
                executor,
                ExecuteConfig {
                    batch_size: config.execute_batch_size,
                },
            )),
            JobConfig::every(config.execute_interval)
                .wake_on(Signal::InteractionsSimulated)
                .cool_down(Duration::from_secs(1)),
        );
        scheduler.register(
            Arc::new(RetrySweepJob::new(
                store.clone(),
                signals.clone(),
                RetrySweepConfig {
                    max_age: config
                        .archive_after_days
                        .map(|days| Duration::from_secs(days * 24 * 3600)),
                    ..RetrySweepConfig::default()
                },
            )),
            JobConfig::every(config.retry_interval),
        );

        let scheduler = Arc::new(scheduler);
        let handles = scheduler.start(shutdown_rx);
        info!(jobs = ?scheduler.names(), "   ✓ Job scheduler started");
        (app_state.with_scheduler(scheduler), handles)
    } else {
        info!("   ○ Jobs disabled");
        (app_state, Vec::new())
    };
    let app_state = Arc::new(app_state);

    let router = if config.enable_rate_limiting {
        info!("   ✓ Rate limiting enabled");
        create_router_with_rate_limit(app_state, config.rate_limit_config)
    } else {
        info!("   ○ Rate limiting disabled");
        create_router(app_state)
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight runs finish before their loops observe the signal
    let _ = shutdown_tx.send(true);
    futures::future::join_all(job_handles).await;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
