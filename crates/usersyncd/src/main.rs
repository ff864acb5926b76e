// # usersyncd - User Pool Sync Daemon
//
// Thin integration layer: all reconciliation logic lives in usersync-core.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering directory bindings and building the collaborators
// 4. Running the controller until SIGTERM/SIGINT
//
// ## Configuration
//
// ### User pool (omit both to run without directory synchronization)
// - `USERSYNC_USER_POOL_ID`: Cognito user pool id
// - `USERSYNC_USER_POOL_NAME`: Cognito user pool name, resolved at startup
// - `USERSYNC_AWS_REGION`: AWS region (falls back to `AWS_REGION`)
// - `USERSYNC_COGNITO_ENDPOINT`: Endpoint override (optional)
//
// AWS credentials are read from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
// and `AWS_SESSION_TOKEN`.
//
// ### Object store
// - `USERSYNC_STORE_TYPE`: `file` or `memory` (default: `file`)
// - `USERSYNC_STORE_PATH`: Path to the store file (for file store)
//
// ### Controller
// - `USERSYNC_REQUEUE_AFTER_SECS`: Retry delay after a directory failure (default: 300)
// - `USERSYNC_RESYNC_INTERVAL_SECS`: Periodic resync interval (default: 600)
// - `USERSYNC_MAX_CONCURRENT`: Resources reconciled concurrently (default: 4)
// - `USERSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export USERSYNC_USER_POOL_NAME=employees
// export USERSYNC_AWS_REGION=eu-west-1
// export USERSYNC_STORE_PATH=/var/lib/usersync/users.json
//
// usersyncd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use usersync_core::config::{ControllerConfig, DirectoryConfig, ObjectStoreConfig, UserPoolRef};
use usersync_core::{Controller, ControllerEvent, Registry, ResyncTriggerSource, UserReconciler};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum SyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<SyncExitCode> for ExitCode {
    fn from(code: SyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    user_pool_id: Option<String>,
    user_pool_name: Option<String>,
    region: Option<String>,
    cognito_endpoint: Option<String>,
    store_type: String,
    store_path: Option<String>,
    requeue_after_secs: Option<u64>,
    resync_interval_secs: Option<u64>,
    max_concurrent: Option<usize>,
    log_level: String,
}

/// Read an optional variable, treating empty as unset
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read an optional numeric variable
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", name, raw, e)),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            user_pool_id: var("USERSYNC_USER_POOL_ID"),
            user_pool_name: var("USERSYNC_USER_POOL_NAME"),
            region: var("USERSYNC_AWS_REGION").or_else(|| var("AWS_REGION")),
            cognito_endpoint: var("USERSYNC_COGNITO_ENDPOINT"),
            store_type: var("USERSYNC_STORE_TYPE").unwrap_or_else(|| "file".to_string()),
            store_path: var("USERSYNC_STORE_PATH"),
            requeue_after_secs: parse_var("USERSYNC_REQUEUE_AFTER_SECS")?,
            resync_interval_secs: parse_var("USERSYNC_RESYNC_INTERVAL_SECS")?,
            max_concurrent: parse_var("USERSYNC_MAX_CONCURRENT")?,
            log_level: var("USERSYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.user_pool_id.is_some() && self.user_pool_name.is_some() {
            anyhow::bail!(
                "Set only one of USERSYNC_USER_POOL_ID and USERSYNC_USER_POOL_NAME"
            );
        }

        if self.has_user_pool() && self.region.is_none() && self.cognito_endpoint.is_none() {
            anyhow::bail!(
                "USERSYNC_AWS_REGION is required when a user pool is configured. \
                Set it via: export USERSYNC_AWS_REGION=eu-west-1"
            );
        }

        match self.store_type.as_str() {
            "file" => {
                let Some(path) = self.store_path.as_deref() else {
                    anyhow::bail!(
                        "USERSYNC_STORE_PATH is required when USERSYNC_STORE_TYPE=file. \
                        Set it via: export USERSYNC_STORE_PATH=/var/lib/usersync/users.json"
                    );
                };
                if let Some(parent) = std::path::Path::new(path).parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    anyhow::bail!(
                        "USERSYNC_STORE_PATH parent directory does not exist: {}. \
                        Create it first: sudo mkdir -p {}",
                        parent.display(),
                        parent.display()
                    );
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "USERSYNC_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        }

        if let Some(secs) = self.requeue_after_secs
            && !(1..=86_400).contains(&secs)
        {
            anyhow::bail!(
                "USERSYNC_REQUEUE_AFTER_SECS must be between 1 and 86400 seconds. Got: {}",
                secs
            );
        }

        if let Some(secs) = self.resync_interval_secs
            && !(10..=86_400).contains(&secs)
        {
            anyhow::bail!(
                "USERSYNC_RESYNC_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                secs
            );
        }

        if let Some(max) = self.max_concurrent
            && !(1..=64).contains(&max)
        {
            anyhow::bail!("USERSYNC_MAX_CONCURRENT must be between 1 and 64. Got: {}", max);
        }

        parse_level(&self.log_level)?;

        Ok(())
    }

    fn has_user_pool(&self) -> bool {
        self.user_pool_id.is_some() || self.user_pool_name.is_some()
    }

    fn directory_config(&self) -> Option<DirectoryConfig> {
        let user_pool = match (&self.user_pool_id, &self.user_pool_name) {
            (Some(id), _) => UserPoolRef::Id(id.clone()),
            (None, Some(name)) => UserPoolRef::Name(name.clone()),
            (None, None) => return None,
        };
        Some(DirectoryConfig::Cognito {
            user_pool,
            region: self.region.clone().unwrap_or_default(),
            endpoint: self.cognito_endpoint.clone(),
        })
    }

    fn object_store_config(&self) -> ObjectStoreConfig {
        match (self.store_type.as_str(), &self.store_path) {
            ("file", Some(path)) => ObjectStoreConfig::File { path: path.clone() },
            _ => ObjectStoreConfig::Memory,
        }
    }

    fn controller_config(&self) -> ControllerConfig {
        let mut controller = ControllerConfig::default();
        if let Some(secs) = self.requeue_after_secs {
            controller.requeue_after_secs = secs;
        }
        if let Some(secs) = self.resync_interval_secs {
            controller.resync_interval_secs = secs;
        }
        if let Some(max) = self.max_concurrent {
            controller.max_concurrent_reconciles = max;
        }
        controller
    }
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "USERSYNC_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return SyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return SyncExitCode::ConfigError.into();
    }

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SyncExitCode::ConfigError.into();
    }

    info!("Starting usersyncd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return SyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            SyncExitCode::RuntimeError
        } else {
            SyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the collaborators and run the controller until a shutdown signal
async fn run_daemon(config: Config) -> Result<()> {
    let registry = Arc::new(Registry::with_builtin());

    #[cfg(feature = "cognito")]
    {
        info!("Registering Cognito directory");
        usersync_directory_cognito::register(&registry);
    }

    let store_config = config.object_store_config();
    let store = registry
        .create_object_store(&store_config)
        .await
        .with_context(|| format!("failed to open {} object store", store_config.type_name()))?;
    let store: Arc<dyn usersync_core::ObjectStore> = Arc::from(store);

    let directory = match config.directory_config() {
        Some(directory_config) => {
            let directory = registry
                .create_directory(&directory_config)
                .await
                .context("failed to initialize the user pool directory")?;
            info!("Directory synchronization enabled ({})", directory.directory_name());
            Some(Arc::from(directory))
        }
        None => {
            warn!("No user pool configured; directory synchronization is disabled");
            None
        }
    };

    let controller_config = config.controller_config();
    let reconciler = UserReconciler::new(store.clone(), directory, registry, &controller_config);
    let source = ResyncTriggerSource::new(
        store,
        Duration::from_secs(controller_config.resync_interval_secs),
    );

    let (controller, mut events) = Controller::new(reconciler, Box::new(source), controller_config)?;

    // Surface failed passes at error level; everything else is already logged
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ControllerEvent::Failed { object_ref, error } = event {
                error!("Reconciliation of {} failed permanently: {}", object_ref, error);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut controller_task =
        tokio::spawn(async move { controller.run_with_shutdown(Some(shutdown_rx)).await });

    info!("Daemon initialized successfully");

    tokio::select! {
        signal = wait_for_shutdown() => {
            let signal = signal?;
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());
        }
        result = &mut controller_task => {
            // The controller stopped on its own
            return match result {
                Ok(outcome) => outcome.map_err(Into::into),
                Err(e) => Err(anyhow::anyhow!("controller task failed: {}", e)),
            };
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, controller_task).await {
        Ok(Ok(outcome)) => outcome?,
        Ok(Err(e)) => anyhow::bail!("controller task failed: {}", e),
        Err(_) => anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT),
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Upper bound on draining in-flight passes after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
