//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the gateway
//! - `hooks list|create|delete|attach|detach|move|params` -- manage hooks
//!   directly in the store
//! - `components` -- list the registered component types
//! - `version` -- print version info

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::components::{ComponentRegistry, Params};
use crate::config::{self, GatewayConfig};
use crate::hooks::{Direction, HookStore};
use crate::store::Store;

/// Webhook ingestion gateway.
#[derive(Parser, Debug)]
#[command(
    name = "hookrelay",
    version = env!("CARGO_PKG_VERSION"),
    about = "hookrelay: receive webhooks and run them through component pipelines"
)]
pub struct Cli {
    /// Config file (default: $HOOKRELAY_STATE_DIR/hookrelay.json5 or ~/.hookrelay/hookrelay.json5).
    #[arg(long, global = true, env = "HOOKRELAY_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway (default when no subcommand is given).
    Start,

    /// Manage hooks and their component chains.
    #[command(subcommand)]
    Hooks(HooksCommand),

    /// List the available component types.
    Components,

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum HooksCommand {
    /// List every hook with its delivery counts.
    List,

    /// Create an empty hook.
    Create { id: String },

    /// Delete a hook. Statistics and component state are kept.
    Delete { id: String },

    /// Attach a component to the end of a hook's chain.
    Attach {
        hook: String,
        /// Component type, e.g. `github-validator`.
        component: String,
        /// Configuration parameter as `key=value`; repeatable.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Remove a component instance from a hook's chain.
    Detach { hook: String, instance: String },

    /// Move a component instance one position up or down.
    Move {
        hook: String,
        instance: String,
        #[arg(value_parser = parse_direction)]
        direction: Direction,
    },

    /// Show a component's parameters, or replace them with `--set`.
    Params {
        hook: String,
        component: String,
        /// New parameter as `key=value`; repeatable.
        #[arg(short, long = "set", value_parser = parse_param)]
        set: Vec<(String, String)>,
    },
}

/// Parse a `key=value` argument.
fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    raw.parse::<Direction>().map_err(|e| e.to_string())
}

/// Load the config from `path` if given, else from the default location.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, config::ConfigError> {
    match path {
        Some(path) => {
            let mut cfg = config::load_config_from(path)?;
            cfg.apply_env_overrides()?;
            Ok(cfg)
        }
        None => config::load_config(),
    }
}

/// Open the store named by the config with the built-in components.
pub async fn open_hook_store(cfg: &GatewayConfig) -> Result<HookStore, Box<dyn std::error::Error>> {
    let store = Store::open_with_busy_timeout(&cfg.store_path(), cfg.busy_timeout()).await?;
    let registry = Arc::new(ComponentRegistry::builtin(&cfg.component_settings()));
    Ok(HookStore::new(store, registry))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a `hooks` subcommand.
pub async fn handle_hooks(
    cfg: &GatewayConfig,
    command: HooksCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let hooks = open_hook_store(cfg).await?;

    match command {
        HooksCommand::List => print_json(&hooks.list().await?)?,
        HooksCommand::Create { id } => {
            let hook = hooks.create(&id).await?;
            println!("Created hook {}", hook.id);
        }
        HooksCommand::Delete { id } => {
            hooks.delete(&id).await?;
            println!("Deleted hook {}", id);
        }
        HooksCommand::Attach {
            hook,
            component,
            params,
        } => {
            let params: Params = params.into_iter().collect();
            let instance = hooks.attach_component(&hook, &component, params).await?;
            println!("Attached {} as {}", instance.name, instance.id);
        }
        HooksCommand::Detach { hook, instance } => {
            hooks.detach_component(&hook, &instance).await?;
            println!("Detached {} from {}", instance, hook);
        }
        HooksCommand::Move {
            hook,
            instance,
            direction,
        } => print_json(&hooks.move_component(&hook, &instance, direction).await?)?,
        HooksCommand::Params {
            hook,
            component,
            set,
        } => {
            if !set.is_empty() {
                let params: Params = set.into_iter().collect();
                hooks.reconfigure_component(&hook, &component, params).await?;
            }
            print_json(&hooks.component_params(&hook, &component).await?)?;
        }
    }
    Ok(())
}

/// Run the `components` subcommand.
pub fn handle_components(cfg: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ComponentRegistry::builtin(&cfg.component_settings());
    for info in registry.all_registered() {
        let template = info.config_template.as_deref().unwrap_or("-");
        println!("{:<26} {:<28} {}", info.name, info.display_name, template);
    }
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("hookrelay {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["hookrelay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_start_and_version() {
        let cli = Cli::try_parse_from(["hookrelay", "start"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Start)));
        let cli = Cli::try_parse_from(["hookrelay", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli =
            Cli::try_parse_from(["hookrelay", "components", "--config", "/tmp/x.json5"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.json5")));
        assert!(matches!(cli.command, Some(Command::Components)));
    }

    #[test]
    fn test_cli_hooks_attach_params() {
        let cli = Cli::try_parse_from([
            "hookrelay",
            "hooks",
            "attach",
            "deploy",
            "rate-limit-filter",
            "-p",
            "amount=2",
            "--param",
            "interval=60",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Hooks(HooksCommand::Attach {
                hook,
                component,
                params,
            })) => {
                assert_eq!(hook, "deploy");
                assert_eq!(component, "rate-limit-filter");
                assert_eq!(
                    params,
                    vec![
                        ("amount".to_string(), "2".to_string()),
                        ("interval".to_string(), "60".to_string())
                    ]
                );
            }
            other => panic!("Expected Hooks(Attach), got {:?}", other),
        }
    }

    #[test]
    fn test_cli_hooks_move() {
        let cli = Cli::try_parse_from(["hookrelay", "hooks", "move", "h", "i1", "up"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Hooks(HooksCommand::Move {
                direction: Direction::Up,
                ..
            }))
        ));
        assert!(Cli::try_parse_from(["hookrelay", "hooks", "move", "h", "i1", "sideways"]).is_err());
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("url=http://x/?a=b").unwrap(),
            ("url".to_string(), "http://x/?a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[tokio::test]
    async fn test_handle_hooks_against_store() {
        let dir = TempDir::new().unwrap();
        let cfg = GatewayConfig::from_value(json!({
            "store": { "path": dir.path().join("cli.db") },
            "components": { "artifactDir": dir.path().join("log") },
        }))
        .unwrap();

        handle_hooks(&cfg, HooksCommand::Create { id: "cli".into() })
            .await
            .unwrap();
        handle_hooks(
            &cfg,
            HooksCommand::Attach {
                hook: "cli".into(),
                component: "github-validator".into(),
                params: vec![("secret".into(), "s".into())],
            },
        )
        .await
        .unwrap();
        handle_hooks(
            &cfg,
            HooksCommand::Params {
                hook: "cli".into(),
                component: "github-validator".into(),
                set: vec![("secret".into(), "t".into())],
            },
        )
        .await
        .unwrap();

        let hooks = open_hook_store(&cfg).await.unwrap();
        let hook = hooks.find("cli").await.unwrap();
        assert_eq!(hook.components.len(), 1);
        assert_eq!(
            hooks
                .component_params("cli", "github-validator")
                .await
                .unwrap()
                .get("secret")
                .map(String::as_str),
            Some("t")
        );

        let missing = handle_hooks(&cfg, HooksCommand::Delete { id: "nope".into() }).await;
        assert!(missing.is_err());
    }
}
