//! Gateway config loader (strict parsing) and programmatic options.

pub mod options;
pub mod schema;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sessionbus_core::error::{Result, SessionBusError};

pub use options::{ClientTransportConfig, HubConfig, RequestOptions, ServerTransportConfig};
pub use schema::{GatewayConfig, GatewaySection, HubSection, RpcSection};

/// Environment variable naming the gateway config file.
pub const CONFIG_ENV: &str = "SESSIONBUS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "sessionbus.yaml";

/// Config path from `SESSIONBUS_CONFIG`, falling back to `sessionbus.yaml`.
pub fn config_path() -> PathBuf {
    config_path_from(std::env::var(CONFIG_ENV).ok())
}

/// Blank values count as unset.
pub fn config_path_from(value: Option<String>) -> PathBuf {
    match value {
        Some(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SessionBusError::BadRequest(format!("config file {} not found", path.display())),
        _ => SessionBusError::Internal(format!("read config {} failed: {e}", path.display())),
    })?;
    load_from_str(&s).map_err(|e| match e {
        SessionBusError::BadRequest(msg) => SessionBusError::BadRequest(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn load_from_str(s: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = serde_yaml::from_str(s).map_err(|e| match e.location() {
        Some(at) => SessionBusError::BadRequest(format!("invalid yaml at line {}: {e}", at.line())),
        None => SessionBusError::BadRequest(format!("invalid yaml: {e}")),
    })?;
    cfg.validate()?;
    Ok(cfg)
}
