// # dns-shimd - Label-driven DNS Shim Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// - This is a THIN integration layer ONLY
// - DO NOT add reconciliation, diffing, or retry logic here
// - All reconciliation logic MUST be in dns-shim-core
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Opening a directory session
// 4. Wiring the reconciler and scheduler, then waiting for a signal
//
// ## Configuration
//
// ### Directory
// - `PIHOLE_API`: API base URL (default `http://pi.hole:8080/api`)
// - `PIHOLE_TOKEN`: API password (required)
//
// ### State
// - `STATE_FILE`: Path to the state file (default `/state/pihole.state`)
//
// ### Reconciliation
// - `INTERVAL_SECONDS`: Full reconciliation interval (default 10)
// - `REAP_SECONDS`: Grace before an unwanted record is deleted (default 300),
//   `REMOVAL_SECONDS` is accepted as an alias
// - `LABEL_KEY`: Container label carrying records (default `pihole.custom-record`)
//
// ### Events
// - `SYNC_MODE`: `interval` or `events` (default interval)
// - `EVENT_WINDOW_MODE`: `debounce` or `batch` (default debounce)
// - `EVENT_WINDOW_MS`: Window length in milliseconds (default 2000)
// - `EVENT_ACTIONS`: Comma-separated container actions (default all)
// - `SAFETY_NET_SECONDS`: Full pass period in event mode (default 300)
// - `EVENT_RECONNECT_SECONDS`: Event stream reconnect delay (default 5)
//
// ### Runtime
// - `DOCKER_URL`: Docker endpoint, `unix://` or `tcp://` (default local)
// - `LOGGING_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export PIHOLE_API=http://pihole.lan/api
// export PIHOLE_TOKEN=your_password
// export SYNC_MODE=events
// export STATE_FILE=/var/lib/dns-shim/pihole.state
//
// dns-shimd
// ```

use anyhow::Result;
use dns_shim_core::config::{DirectoryConfig, EngineConfig, StateConfig};
use dns_shim_core::traits::WorkloadAction;
use dns_shim_core::{
    FileStateStore, Reconciler, Scheduler, ShimConfig, TriggerConfig, TriggerMode, WindowPolicy,
    open_session,
};
use dns_shim_docker::DockerInventory;
use dns_shim_pihole::PiholeClient;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or authentication failure
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ShimExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or rejected credential
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<ShimExitCode> for ExitCode {
    fn from(code: ShimExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    shim: ShimConfig,
    docker_url: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    ///
    /// Empty values count as unset.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let directory_defaults = DirectoryConfig::default();
        let trigger_defaults = TriggerConfig::default();
        let engine_defaults = EngineConfig::default();

        let directory = DirectoryConfig {
            base_url: get("PIHOLE_API").unwrap_or(directory_defaults.base_url),
            secret: get("PIHOLE_TOKEN").unwrap_or_default(),
            client_identity: directory_defaults.client_identity,
        };

        let state = StateConfig {
            path: get("STATE_FILE").unwrap_or_else(|| StateConfig::default().path),
        };

        let reap_raw = get("REAP_SECONDS").or_else(|| get("REMOVAL_SECONDS"));
        let engine = EngineConfig {
            reap_grace_secs: parse_or("REAP_SECONDS", reap_raw, engine_defaults.reap_grace_secs)?,
            label_key: get("LABEL_KEY").unwrap_or(engine_defaults.label_key),
        };

        let mode = match get("SYNC_MODE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("interval") => TriggerMode::Interval,
            Some("events") => TriggerMode::Events,
            Some(other) => anyhow::bail!(
                "SYNC_MODE '{}' is not valid. Valid modes: interval, events",
                other
            ),
        };

        let window = match get("EVENT_WINDOW_MODE")
            .as_deref()
            .map(str::to_lowercase)
            .as_deref()
        {
            None | Some("debounce") => WindowPolicy::Debounce,
            Some("batch") => WindowPolicy::Batch,
            Some(other) => anyhow::bail!(
                "EVENT_WINDOW_MODE '{}' is not valid. Valid modes: debounce, batch",
                other
            ),
        };

        let actions = match get("EVENT_ACTIONS") {
            Some(raw) => parse_actions(&raw)?,
            None => trigger_defaults.actions.clone(),
        };

        let trigger = TriggerConfig {
            mode,
            interval_secs: parse_or(
                "INTERVAL_SECONDS",
                get("INTERVAL_SECONDS"),
                trigger_defaults.interval_secs,
            )?,
            window,
            window_ms: parse_or("EVENT_WINDOW_MS", get("EVENT_WINDOW_MS"), trigger_defaults.window_ms)?,
            actions,
            safety_net_secs: parse_or(
                "SAFETY_NET_SECONDS",
                get("SAFETY_NET_SECONDS"),
                trigger_defaults.safety_net_secs,
            )?,
            reconnect_backoff_secs: parse_or(
                "EVENT_RECONNECT_SECONDS",
                get("EVENT_RECONNECT_SECONDS"),
                trigger_defaults.reconnect_backoff_secs,
            )?,
            shutdown_grace_secs: trigger_defaults.shutdown_grace_secs,
        };

        Ok(Self {
            shim: ShimConfig {
                directory,
                state,
                engine,
                trigger,
            },
            docker_url: get("DOCKER_URL"),
            log_level: get("LOGGING_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.shim.directory.secret.is_empty() {
            anyhow::bail!(
                "PIHOLE_TOKEN is required. \
                Set it via: export PIHOLE_TOKEN=your_password"
            );
        }

        let url = &self.shim.directory.base_url;
        if !url.starts_with("https://") && !url.starts_with("http://") {
            anyhow::bail!("PIHOLE_API must use HTTP or HTTPS scheme. Got: {}", url);
        }

        if let Some(ref docker_url) = self.docker_url
            && !["unix://", "tcp://", "http://"]
                .iter()
                .any(|scheme| docker_url.starts_with(scheme))
        {
            anyhow::bail!(
                "DOCKER_URL must use unix://, tcp:// or http://. Got: {}",
                docker_url
            );
        }

        // Check parent directory exists
        if let Some(parent) = std::path::Path::new(&self.shim.state.path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "STATE_FILE parent directory does not exist: {}. \
                    Create it first: mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "LOGGING_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.shim.validate()?;
        Ok(())
    }
}

/// Parse an optional numeric variable, falling back to `default`
fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer. Got: {}", name, raw)),
    }
}

/// Parse a comma-separated action allow-list
fn parse_actions(raw: &str) -> Result<Vec<WorkloadAction>> {
    let mut actions = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let action: WorkloadAction = name
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("EVENT_ACTIONS: {}", e))?;
        if !actions.contains(&action) {
            actions.push(action);
        }
    }
    Ok(actions)
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ShimExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ShimExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ShimExitCode::ConfigError.into();
    }

    info!("Starting dns-shimd");
    info!(
        "Mode: {:?}, directory: {}, state file: {}",
        config.shim.trigger.mode, config.shim.directory.base_url, config.shim.state.path
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ShimExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let directory = match connect_directory(&config.shim.directory).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to open directory session: {}", e);
                return ShimExitCode::ConfigError;
            }
        };

        if let Err(e) = run_daemon(config, directory).await {
            error!("Daemon error: {}", e);
            ShimExitCode::RuntimeError
        } else {
            ShimExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Create the directory client and authenticate
async fn connect_directory(config: &DirectoryConfig) -> Result<Arc<PiholeClient>> {
    let client = Arc::new(PiholeClient::new(config)?);
    let revoked = open_session(client.as_ref(), &config.secret).await?;
    if revoked > 0 {
        info!("Revoked {} stale session(s)", revoked);
    }
    Ok(client)
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config, directory: Arc<PiholeClient>) -> Result<()> {
    let state_store = Arc::new(FileStateStore::new(&config.shim.state.path).await?);
    let inventory = Arc::new(DockerInventory::connect(config.docker_url.as_deref())?);

    let reconciler = Arc::new(Reconciler::open(directory, state_store, &config.shim.engine).await);
    let scheduler = Scheduler::new(reconciler, inventory, config.shim.trigger);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => warn!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let outcome = scheduler.run(shutdown_rx).await;
    signals.abort();

    outcome?;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
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

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
