//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::router::{AppState, Limits, create_router};
use crate::auth::{ApiKeyStore, AuthState};
use crate::beacon::{BeaconReporter, UsageMeter};
use crate::config::Config;
use crate::ledger::LedgerRegistry;
use crate::payment::PaymentGate;
use crate::principal::Principal;
use crate::protocol::Info;
use crate::resources::ResourceCatalog;
use crate::tools::ToolRegistry;
use crate::treasury::Treasury;
use crate::{Error, Result};

/// MCP tollgate server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request state
    state: Arc<AppState>,
    /// Usage reporter, started by [`Gateway::serve`]
    beacon: Option<BeaconReporter>,
}

impl Gateway {
    /// Create a gateway with HTTP ledger clients and the bundled tools
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when a client cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        let ledgers = LedgerRegistry::from_config(&config.ledgers, config.payment.ledger_timeout)
            .map_err(|e| Error::Config(e.to_string()))?;
        Self::with_components(config, ledgers, ToolRegistry::with_builtins()).await
    }

    /// Create a gateway over the given ledgers and tools
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, a payment ledger missing from
    /// `ledgers`, or a beacon that cannot be set up.
    pub async fn with_components(
        config: Config,
        ledgers: LedgerRegistry,
        tools: ToolRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let api_keys = Arc::new(ApiKeyStore::new());
        let auth = Arc::new(
            AuthState::from_config(
                &config.auth,
                config.server.public_url.clone(),
                Arc::clone(&api_keys),
            )
            .map_err(|e| Error::Config(e.to_string()))?,
        );

        let payment = PaymentGate::from_config(
            &config.payment,
            &ledgers,
            config.treasury.account.clone(),
        )
        .map_err(|e| Error::Config(e.to_string()))?
        .map(Arc::new);

        let treasury = Arc::new(Treasury::new(
            Principal::new(config.treasury.resolve_owner()),
            config.treasury.account.clone(),
            ledgers,
            config.payment.ledger_timeout,
        ));

        let meter = Arc::new(UsageMeter::new());
        let beacon = BeaconReporter::from_config(&config.beacon, Arc::clone(&meter), None).await?;

        let state = Arc::new(AppState {
            info: Info {
                name: config.server.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: config.server.instructions.clone(),
            auth,
            tools,
            tool_scopes: config.auth.tool_scopes.clone(),
            resources: ResourceCatalog::from_config(&config.resources),
            payment,
            treasury,
            meter,
            api_keys,
            limits: Limits {
                max_body_size: config.server.max_body_size,
                request_timeout: config.server.request_timeout,
            },
        });

        Ok(Self {
            config,
            state,
            beacon,
        })
    }

    /// HTTP application
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Usage counters
    #[must_use]
    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.state.meter
    }

    /// Code hash the beacon reports, when the beacon is enabled
    #[must_use]
    pub fn code_hash(&self) -> Option<&str> {
        self.beacon.as_ref().map(BeaconReporter::code_hash)
    }

    /// Serve on `listener` until `shutdown` fires, then stop the beacon
    /// after its final flush.
    ///
    /// # Errors
    ///
    /// Fails if the server stops with an I/O error.
    pub async fn serve(self, listener: TcpListener, shutdown: broadcast::Sender<()>) -> Result<()> {
        install_metrics();

        let app = self.router();
        let beacon = self.beacon.map(|b| b.spawn(shutdown.subscribe()));

        let mut server_shutdown = shutdown.subscribe();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
            .map_err(|e| Error::Internal(e.to_string()));

        if let Some(handle) = beacon {
            // A server error must still stop the reporter
            let _ = shutdown.send(());
            if let Err(e) = handle.await {
                error!(error = %e, "Usage beacon task failed");
            }
        }
        served
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Fails on an unparsable host, a bind failure, or a server error.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        self.log_banner();

        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(shutdown_signal(shutdown_tx.clone()));
        self.serve(listener, shutdown_tx).await
    }

    fn log_banner(&self) {
        let config = &self.config;
        info!("============================================================");
        info!("MCP TOLLGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %config.server.host, port = %config.server.port, "Listening");
        info!(tools = self.state.tools.len(), resources = config.resources.len(), "Tools registered");

        if self.state.auth.enabled() {
            info!(
                issuer = self.state.auth.issuer().unwrap_or("-"),
                api_keys = config.auth.api_keys.len(),
                "AUTHENTICATION enabled"
            );
        } else {
            warn!("AUTHENTICATION disabled - every caller is anonymous and cannot pay");
        }

        if let Some(gate) = &self.state.payment {
            info!(ledger = %gate.ledger_id(), treasury = %self.state.treasury.account(), "PAYMENTS enabled");
            for (tool, price) in &config.payment.prices {
                info!("  {tool}: {price}");
            }
        }

        info!(owner = %self.state.treasury.get_owner(), "Treasury owner");

        if let Some(hash) = self.code_hash() {
            info!(tracker = config.beacon.tracker_url.as_deref().unwrap_or("-"), code_hash = %hash, "USAGE BEACON enabled");
        }
        info!("============================================================");
    }
}

#[cfg(feature = "metrics")]
fn install_metrics() {
    if crate::metrics::prometheus().is_none() {
        warn!("Prometheus exposition unavailable");
    }
}

#[cfg(not(feature = "metrics"))]
fn install_metrics() {
    crate::metrics::describe();
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
