use clap::Parser;
use tracing::{info, warn};

use hookrelay::cli::{self, Cli, Command};
use hookrelay::config::GatewayConfig;
use hookrelay::logging;
use hookrelay::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        // No subcommand or explicit `start` both launch the gateway.
        None | Some(Command::Start) => run_server(cfg).await,

        Some(Command::Hooks(sub)) => cli::handle_hooks(&cfg, sub).await,

        Some(Command::Components) => cli::handle_components(&cfg),

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server(cfg: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(cfg.log_config())?;

    let hooks = cli::open_hook_store(&cfg).await?;
    info!(
        target: "gateway",
        version = env!("CARGO_PKG_VERSION"),
        store = %cfg.store_path().display(),
        components = hooks.registry().len(),
        "starting hookrelay"
    );

    let server_config = ServerConfig {
        hooks,
        http_config: cfg.http_config(),
        bind_address: cfg.listen_addr()?,
        admin: cfg.admin_listener()?,
        dispatcher: cfg.dispatcher_config(),
        delivery_timeout: cfg.delivery_timeout(),
    };

    let handle = run_server_with_config(server_config).await?;

    let reason = await_shutdown_trigger().await?;
    info!(target: "gateway", "Shutdown signal received ({})", reason);
    handle.shutdown().await;
    Ok(())
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> Result<&'static str, std::io::Error> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => Ok("ctrl-c"),
                _ = sigterm.recv() => Ok("SIGTERM"),
            }
        }
        Err(e) => {
            warn!(
                target: "gateway",
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            tokio::signal::ctrl_c().await?;
            Ok("ctrl-c")
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> Result<&'static str, std::io::Error> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
