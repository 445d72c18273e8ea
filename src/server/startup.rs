//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so that integration tests
//! can spin up the ingress and admin listeners on ephemeral ports, exercise
//! them, and shut everything down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::hooks::HookStore;
use crate::pipeline::{
    Dispatcher, DispatcherConfig, DispatcherHandle, PipelineExecutor, DEFAULT_DELIVERY_TIMEOUT,
};
use crate::server::admin::{create_admin_router, AdminConfig};
use crate::server::http::{create_router, HttpConfig};

/// Everything needed to start the gateway.
pub struct ServerConfig {
    pub hooks: HookStore,
    pub http_config: HttpConfig,
    pub bind_address: SocketAddr,
    /// `None` disables the admin listener.
    pub admin: Option<(AdminConfig, SocketAddr)>,
    pub dispatcher: DispatcherConfig,
    pub delivery_timeout: Duration,
}

impl ServerConfig {
    /// Minimal config suitable for integration tests.
    ///
    /// Both listeners bind to `127.0.0.1:0` and the admin API accepts
    /// loopback clients without a token.
    pub fn for_testing(hooks: HookStore) -> Self {
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        ServerConfig {
            hooks,
            http_config: HttpConfig::default(),
            bind_address: loopback,
            admin: Some((AdminConfig::default(), loopback)),
            dispatcher: DispatcherConfig {
                workers: 2,
                queue_capacity: 64,
            },
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

/// Handle to a running gateway. Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    server_tasks: Vec<JoinHandle<Result<(), std::io::Error>>>,
    dispatcher: DispatcherHandle,
}

impl ServerHandle {
    /// The port the ingress listener actually bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// `http://ip:port` base URL for the ingress listener.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// `http://ip:port` base URL for the admin listener, if enabled.
    pub fn admin_url(&self) -> Option<String> {
        self.admin_addr.map(|addr| format!("http://{}", addr))
    }

    /// Stop both listeners, then drain the delivery queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        for task in self.server_tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!(target: "gateway", "server task returned error: {}", e),
                Ok(Err(e)) => error!(target: "gateway", "server task panicked: {}", e),
                Err(_) => warn!(target: "gateway", "server task did not finish within 5s timeout"),
            }
        }

        self.dispatcher.shutdown().await;
        info!(target: "gateway", "gateway stopped");
    }
}

/// Start the gateway from a fully-assembled [`ServerConfig`].
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let executor = Arc::new(PipelineExecutor::new(
        config.hooks.clone(),
        config.delivery_timeout,
    ));
    let (dispatcher, dispatcher_handle) = Dispatcher::start(executor, config.dispatcher);

    let ingress = create_router(config.http_config, config.hooks.clone(), dispatcher);
    let (local_addr, ingress_task) =
        serve(ingress, config.bind_address, shutdown_rx.clone()).await?;
    info!(target: "gateway", address = %local_addr, "ingress listening");

    let mut server_tasks = vec![ingress_task];
    let mut admin_addr = None;
    if let Some((admin_config, admin_bind)) = config.admin {
        if admin_config.token.is_none() {
            warn!(target: "gateway", "admin API has no token; only loopback clients are admitted");
        }
        let admin = create_admin_router(admin_config, config.hooks);
        let (addr, task) = serve(admin, admin_bind, shutdown_rx).await?;
        info!(target: "gateway", address = %addr, "admin API listening");
        admin_addr = Some(addr);
        server_tasks.push(task);
    }

    Ok(ServerHandle {
        local_addr,
        admin_addr,
        shutdown_tx,
        server_tasks,
        dispatcher: dispatcher_handle,
    })
}

/// Bind `address` and spawn `axum::serve` with graceful shutdown.
async fn serve(
    app: Router,
    address: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<Result<(), std::io::Error>>), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    let local_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok((local_addr, task))
}
