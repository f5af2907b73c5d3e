//! MiniPanel - a minimal browser control panel
//!
//! One WebSocket event server hosts two namespaces: `/ssh` bridges a remote
//! shell to the browser terminal, `/dashboard` pushes live host metrics.

// Use mimalloc as the global allocator for better performance
// with high-frequency small allocations (event frames, output chunks)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod auth;
pub mod channel;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod session;
pub mod ssh;
pub mod terminal;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{AuthError, AuthManager, AuthRoutes, CookieAuth};
use channel::{ChannelError, EventServer};
use commands::{DashboardNamespace, SshNamespace};
use config::{expand_path, ConfigStorage, HostDirectory, PanelConfig, StorageError};
use dashboard::{DashboardSession, MetricsCollector, SysinfoCollector};
use session::SessionRegistry;
use ssh::{AuthResolver, ShellConnector, SshConnector};
use terminal::TerminalSession;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("Config error: {0}")]
    Storage(#[from] StorageError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Event channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Initialize logging. `MINIPANEL_LOG` takes precedence over `RUST_LOG`.
pub fn init_logging() {
    let filter = std::env::var("MINIPANEL_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Wired-up panel services, ready to serve
pub struct Panel {
    terminals: Arc<SessionRegistry<TerminalSession>>,
    dashboards: Arc<SessionRegistry<DashboardSession>>,
    auth: Arc<AuthManager>,
    server: EventServer,
}

impl Panel {
    /// Build both namespaces behind the cookie gate
    pub fn new(
        config: &PanelConfig,
        connector: Arc<dyn ShellConnector>,
        collector: Arc<dyn MetricsCollector>,
    ) -> Self {
        let terminals = Arc::new(SessionRegistry::new("terminal"));
        let dashboards = Arc::new(SessionRegistry::new("dashboard"));
        let auth = Arc::new(AuthManager::from_config(config));

        let ssh = SshNamespace::new(
            terminals.clone(),
            connector,
            AuthResolver::new(),
            HostDirectory::new(expand_path(&config.ssh_config_path)),
        );
        let dashboard = DashboardNamespace::new(
            dashboards.clone(),
            collector,
            Duration::from_secs(config.default_refresh_secs),
        );

        let server = EventServer::new()
            .with_namespace("/ssh", Arc::new(ssh))
            .with_namespace("/dashboard", Arc::new(dashboard))
            .with_middleware(Arc::new(CookieAuth::new(auth.clone())))
            .with_http_routes(Arc::new(AuthRoutes::new(auth.clone())));

        Self {
            terminals,
            dashboards,
            auth,
            server,
        }
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// Serve until `shutdown` is cancelled, then close every session
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), PanelError> {
        let result = self.server.serve(listener, shutdown).await;

        self.terminals.shutdown().await;
        self.dashboards.shutdown().await;
        tracing::info!("All sessions closed");

        result.map_err(PanelError::from)
    }
}

/// Load the config and serve until Ctrl-C
pub async fn run() -> Result<(), PanelError> {
    let storage = ConfigStorage::new()?;
    let mut config = storage.load().await?;
    config.apply_env_overrides();
    tracing::info!("Using config at {:?}", storage.path());

    if config.users.is_empty() {
        tracing::warn!("No operator accounts configured; every connection will be refused");
    }

    let listener = TcpListener::bind(&config.bind)
        .await
        .map_err(|source| PanelError::Bind {
            addr: config.bind.clone(),
            source,
        })?;

    let panel = Panel::new(
        &config,
        Arc::new(SshConnector::new()),
        Arc::new(SysinfoCollector::new()),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    panel.serve(listener, shutdown).await
}

/// Create or replace an operator account in the stored config
pub async fn add_user(
    storage: &ConfigStorage,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    let mut config = storage.load().await?;
    let manager = AuthManager::from_config(&config);
    let hash = manager.add_user(username, password)?;

    config.users.insert(username.to_string(), hash);
    storage.save(&config).await?;
    tracing::info!("Operator {} saved to {:?}", username, storage.path());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_user_persists_hash() {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("config.json"));

        add_user(&storage, "admin", "s3cret").await.unwrap();

        let config = storage.load().await.unwrap();
        let manager = AuthManager::from_config(&config);
        assert!(manager.login("admin", "s3cret").is_ok());
        assert!(manager.login("admin", "wrong").is_err());
    }

    #[tokio::test]
    async fn test_add_user_rejects_empty_password() {
        let dir = TempDir::new().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("config.json"));

        assert!(matches!(
            add_user(&storage, "admin", "").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(!storage.exists().await);
    }
}
