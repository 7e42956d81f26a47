//! Configuration data structures for quay.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! every section carries defaults, so an empty file (or none at all) yields a
//! daemon listening on `0.0.0.0:6660` in front of the local docker socket.
use serde::{Deserialize, Serialize};

/// Where non-API traffic is tunnelled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Unix socket path (`/path` or `unix:/path`) or `host:port`
    pub socket: String,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".to_string(),
        }
    }
}

/// The reverse proxy whose configuration follows the route set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FrontendConfig {
    /// Executable launched as the proxy master process
    pub command: String,
    /// Arguments passed to `command`
    pub args: Vec<String>,
    /// Directory the proxy includes `*.conf` files from
    pub config_dir: String,
    /// Launch and signal the proxy ourselves. When false only the config
    /// directory is maintained.
    pub manage_process: bool,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            command: "nginx".to_string(),
            args: vec!["-g".to_string(), "daemon off;".to_string()],
            config_dir: "/etc/nginx/conf.d".to_string(),
            manage_process: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive, e.g. `info` or `quay=debug,info`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level daemon configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the combined API / passthrough listener binds to
    pub listen_addr: String,
    /// Directory holding the route database
    pub data_path: String,
    /// Request paths starting with this prefix are served by the control API
    pub api_prefix: String,
    pub passthrough: PassthroughConfig,
    pub frontend: FrontendConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6660".to_string(),
            data_path: "routes.db".to_string(),
            api_prefix: "/api/".to_string(),
            passthrough: PassthroughConfig::default(),
            frontend: FrontendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Commented configuration written by `quay init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# quay ingress control plane configuration

# Address for the control API and the container engine passthrough
listen_addr = "0.0.0.0:6660"

# Route database directory
data_path = "routes.db"

# Requests whose path starts with this prefix are handled by the control API
api_prefix = "/api/"

[passthrough]
# Unix socket path or host:port receiving every other request
socket = "/var/run/docker.sock"

[frontend]
command = "nginx"
args = ["-g", "daemon off;"]
config_dir = "/etc/nginx/conf.d"
# Set to false when the proxy is supervised elsewhere; quay then only
# rewrites config_dir
manage_process = true

[logging]
level = "info"
json = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:6660");
        assert_eq!(config.passthrough.socket, "/var/run/docker.sock");
        assert_eq!(config.frontend.config_dir, "/etc/nginx/conf.d");
        assert!(config.frontend.manage_process);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"listen_addr":"127.0.0.1:7000","frontend":{"command":"openresty"}}"#)
                .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.frontend.command, "openresty");
        assert_eq!(config.frontend.args, vec!["-g", "daemon off;"]);
        assert_eq!(config.data_path, "routes.db");
    }
}
