//! Configuration parsing module
//!
//! Reads a JSON5 file, substitutes `${VAR}` environment references and
//! deserializes the result into [`GatewayConfig`]. A missing file yields the
//! defaults.

pub mod settings;

use regex::Regex;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

pub use settings::{
    AdminSettings, ComponentsSettings, GatewayConfig, GatewaySettings, IngressSettings,
    LoggingSettings, PipelineSettings, StoreSettings,
};

/// Config file name inside the state directory
pub const CONFIG_FILE_NAME: &str = "hookrelay.json5";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// State directory.
/// Priority: HOOKRELAY_STATE_DIR > ~/.hookrelay
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = env::var("HOOKRELAY_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hookrelay")
}

/// Get the config file path.
/// Priority: HOOKRELAY_CONFIG_PATH > HOOKRELAY_STATE_DIR/hookrelay.json5 > ~/.hookrelay/hookrelay.json5
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("HOOKRELAY_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    state_dir().join(CONFIG_FILE_NAME)
}

/// Load the config from the default location, with env overrides applied.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = get_config_path();
    let mut config = load_config_from(&path)?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Load and validate the config at `path` without env overrides.
pub fn load_config_from(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let value = load_raw_config(path)?;
    GatewayConfig::from_value(value)
}

/// Parse the file into a JSON value with env vars substituted.
/// Returns an empty object if the file doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        debug!(target: "config", path = %path.display(), "no config file; using defaults");
        return Ok(Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut value = parse_json5(&content, path)?;
    substitute_env_vars(&mut value)?;
    debug!(target: "config", path = %path.display(), "config loaded");
    Ok(value)
}

fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Substitute environment variables in string values.
/// Pattern: ${VAR} where VAR matches [A-Z_][A-Z0-9_]*
/// Escape with $${VAR} to get literal ${VAR}
fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR_PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").unwrap());

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}


#[cfg(test)]
mod tests {
    use super::test_env::ENV_LOCK;
    use super::*;
    use tempfile::TempDir;

    fn create_temp_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_json5_comments_and_trailing_commas() {
        let content = r#"{
            // listener
            gateway: { listen: "127.0.0.1:9000", },
        }"#;
        let value = parse_json5(content, Path::new("test.json5")).unwrap();
        assert_eq!(value["gateway"]["listen"], "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_json5_error() {
        let result = parse_json5("{ invalid json", Path::new("bad.json5"));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_env_var_substitution() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("HOOKRELAY_TEST_TOKEN", "s3cret");
        let result = substitute_env_in_string("Bearer ${HOOKRELAY_TEST_TOKEN}!");
        env::remove_var("HOOKRELAY_TEST_TOKEN");
        assert_eq!(result.unwrap(), "Bearer s3cret!");
    }

    #[test]
    fn test_env_var_escaped() {
        assert_eq!(
            substitute_env_in_string("$${NOT_SUBSTITUTED}").unwrap(),
            "${NOT_SUBSTITUTED}"
        );
    }

    #[test]
    fn test_env_var_missing() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("HOOKRELAY_TEST_MISSING");
        let result = substitute_env_in_string("${HOOKRELAY_TEST_MISSING}");
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar { var }) if var == "HOOKRELAY_TEST_MISSING"
        ));
    }

    #[test]
    fn test_env_substitution_in_nested_config() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("HOOKRELAY_TEST_NESTED", "tok");
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(
            &dir,
            r#"{ admin: { token: "${HOOKRELAY_TEST_NESTED}" }, list: ["${HOOKRELAY_TEST_NESTED}"] }"#,
        );
        let value = load_raw_config(&path);
        env::remove_var("HOOKRELAY_TEST_NESTED");
        let value = value.unwrap();
        assert_eq!(value["admin"]["token"], "tok");
        assert_eq!(value["list"][0], "tok");
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.gateway.listen, settings::DEFAULT_LISTEN);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = create_temp_config(
            &dir,
            r#"{ pipeline: { workers: 3 }, ingress: { maxBodyBytes: 2048 } }"#,
        );
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.ingress.max_body_bytes, 2048);
    }

    #[test]
    fn test_get_config_path_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::set_var("HOOKRELAY_CONFIG_PATH", "/tmp/custom.json5");
        let path = get_config_path();
        env::remove_var("HOOKRELAY_CONFIG_PATH");
        assert_eq!(path, PathBuf::from("/tmp/custom.json5"));
    }

    #[test]
    fn test_get_config_path_state_dir() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("HOOKRELAY_CONFIG_PATH");
        env::set_var("HOOKRELAY_STATE_DIR", "/var/lib/hookrelay");
        let path = get_config_path();
        env::remove_var("HOOKRELAY_STATE_DIR");
        assert_eq!(path, PathBuf::from("/var/lib/hookrelay/hookrelay.json5"));
    }

    #[test]
    fn test_get_config_path_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        env::remove_var("HOOKRELAY_CONFIG_PATH");
        env::remove_var("HOOKRELAY_STATE_DIR");
        let path = get_config_path();
        assert!(path.ends_with(".hookrelay/hookrelay.json5"));
    }
}
