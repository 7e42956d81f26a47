//! The route record and its validation rules.
//!
//! A [`Route`] is the unit the control plane stores and renders. The same
//! struct serves both outer surfaces: it derives `serde` for the JSON control
//! API and `prost::Message` for the field-tagged binary encoding the store
//! persists, so new fields can be appended under fresh tags without breaking
//! records already on disk.
use std::net::{Ipv4Addr, Ipv6Addr};

use prost::Message;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a route (or a replacement backend list) is rejected
/// before it reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("Invalid {field} '{value}': {message}")]
    InvalidField {
        field: &'static str,
        value: String,
        message: String,
    },
}

/// Result type for route validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A named ingress rule binding hostnames and a public port to backends.
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    /// Unique identifier and storage key.
    #[prost(string, tag = "1")]
    pub name: String,

    /// Externally-facing port the frontend listens on for this route.
    #[prost(uint32, tag = "2")]
    pub port: u32,

    /// Virtual hosts, in the order they are matched.
    #[prost(string, repeated, tag = "3")]
    pub hosts: Vec<String>,

    /// `host:port` endpoints receiving traffic. Empty means the route is
    /// declared but accepts nothing.
    #[prost(string, repeated, tag = "4")]
    pub backends: Vec<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, port: u32, hosts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            port,
            hosts,
            backends: Vec::new(),
        }
    }

    /// Replace the backend list wholesale.
    pub fn with_backends(mut self, backends: Vec<String>) -> Self {
        self.backends = backends;
        self
    }

    /// Whether the frontend should carry configuration for this route.
    pub fn is_routable(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Check the fields required at creation time.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }
        if self.name.contains('/') {
            return Err(ValidationError::InvalidField {
                field: "name",
                value: self.name.clone(),
                message: "route names cannot contain '/'".to_string(),
            });
        }

        if self.port == 0 {
            return Err(ValidationError::MissingField { field: "port" });
        }
        if self.port > u32::from(u16::MAX) {
            return Err(ValidationError::InvalidField {
                field: "port",
                value: self.port.to_string(),
                message: "port must fit in 16 bits".to_string(),
            });
        }

        if self.hosts.is_empty() {
            return Err(ValidationError::MissingField {
                field: "at least one host",
            });
        }
        for host in &self.hosts {
            validate_host(host)?;
        }

        validate_backends(&self.backends)
    }
}

const HOSTNAME_PATTERN: &str =
    r"^(\*\.)?[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$";

/// Validate a `server_name` entry. A leading `*.` wildcard label is allowed.
fn validate_host(host: &str) -> ValidationResult<()> {
    if host.contains("://") {
        return Err(ValidationError::InvalidField {
            field: "host",
            value: host.to_string(),
            message: "use 'example.com' not 'http://example.com'".to_string(),
        });
    }

    let hostname_regex = Regex::new(HOSTNAME_PATTERN).map_err(|e| ValidationError::InvalidField {
        field: "host",
        value: host.to_string(),
        message: e.to_string(),
    })?;

    if !hostname_regex.is_match(host) {
        return Err(ValidationError::InvalidField {
            field: "host",
            value: host.to_string(),
            message: "not a valid hostname".to_string(),
        });
    }

    Ok(())
}

/// Validate a list of `host:port` backend endpoints.
pub fn validate_backends(backends: &[String]) -> ValidationResult<()> {
    for backend in backends {
        let invalid = |message: &str| ValidationError::InvalidField {
            field: "backend",
            value: backend.clone(),
            message: message.to_string(),
        };

        let (host, port) = backend
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if !is_backend_host(host) {
            return Err(invalid(
                "host must be a hostname, an IPv4 address or a bracketed IPv6 address",
            ));
        }
        match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid("port must be between 1 and 65535")),
            Ok(_) => {}
        }
    }
    Ok(())
}

/// Backend hosts are written verbatim into an `upstream` block.
fn is_backend_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<Ipv6Addr>().is_ok();
    }
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    !host.starts_with('*')
        && Regex::new(HOSTNAME_PATTERN).is_ok_and(|re| re.is_match(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc() -> Route {
        Route::new("svc", 80, vec!["a.example.com".to_string()])
    }

    #[test]
    fn test_valid_route_without_backends() {
        assert!(svc().validate().is_ok());
        assert!(!svc().is_routable());
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let mut route = svc();
        route.name.clear();
        assert_eq!(
            route.validate(),
            Err(ValidationError::MissingField { field: "name" })
        );

        let mut route = svc();
        route.port = 0;
        assert_eq!(
            route.validate(),
            Err(ValidationError::MissingField { field: "port" })
        );

        let mut route = svc();
        route.hosts.clear();
        assert!(matches!(
            route.validate(),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_hosts_and_backends() {
        let mut route = svc();
        route.hosts = vec!["http://a.example.com".to_string()];
        assert!(route.validate().is_err());

        let route = svc().with_backends(vec!["10.0.0.1".to_string()]);
        assert!(route.validate().is_err());

        let route = svc().with_backends(vec!["10.0.0.1:0".to_string()]);
        assert!(route.validate().is_err());

        let route = svc().with_backends(vec!["10.0.0.1:9000".to_string()]);
        assert!(route.validate().is_ok());
        assert!(route.is_routable());
    }

    #[test]
    fn test_backend_hosts_cannot_inject_config() {
        for backend in [
            "a;include/x:80",
            "a}:80",
            "{a:80",
            "a b:80",
            "*.example.com:80",
            "[not-v6]:80",
        ] {
            let result = validate_backends(&[backend.to_string()]);
            assert!(
                matches!(result, Err(ValidationError::InvalidField { field: "backend", .. })),
                "{backend} should be rejected"
            );
        }

        let ok = ["10.0.0.1:9000", "app.internal:8080", "web-1:80", "[::1]:9000"];
        assert!(validate_backends(&ok.map(String::from)).is_ok());
    }

    #[test]
    fn test_wildcard_host_is_accepted() {
        let mut route = svc();
        route.hosts = vec!["*.example.com".to_string()];
        assert!(route.validate().is_ok());
    }

    #[test]
    fn test_json_shape_defaults_missing_lists() {
        let route: Route = serde_json::from_str(r#"{"name":"svc","port":80}"#).unwrap();
        assert_eq!(route.name, "svc");
        assert!(route.hosts.is_empty());
        assert!(route.backends.is_empty());

        let json = serde_json::to_value(svc()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "svc",
                "port": 80,
                "hosts": ["a.example.com"],
                "backends": []
            })
        );
    }

    #[test]
    fn test_binary_encoding_tolerates_unknown_fields() {
        let route = svc().with_backends(vec!["10.0.0.1:9000".to_string()]);
        let mut bytes = route.encode_to_vec();
        // field 9, varint 1: written by a newer version of the record
        bytes.extend_from_slice(&[0x48, 0x01]);

        let decoded = Route::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, route);
    }
}
