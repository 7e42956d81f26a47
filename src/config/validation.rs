use std::net::SocketAddr;

use crate::{adapters::passthrough::BackendAddr, config::models::ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at
    /// once.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.data_path.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "data_path".to_string(),
            });
        }

        if let Err(e) = Self::validate_api_prefix(&config.api_prefix) {
            errors.push(e);
        }

        if let Err(e) = config.passthrough.socket.parse::<BackendAddr>() {
            errors.push(ValidationError::InvalidField {
                field: "passthrough.socket".to_string(),
                message: e,
            });
        }

        if config.frontend.config_dir.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "frontend.config_dir".to_string(),
            });
        }
        if config.frontend.manage_process && config.frontend.command.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "frontend.command".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '0.0.0.0:6660')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_api_prefix(prefix: &str) -> ValidationResult<()> {
        if prefix.len() < 2 || !prefix.starts_with('/') || !prefix.ends_with('/') {
            return Err(ValidationError::InvalidField {
                field: "api_prefix".to_string(),
                message: format!("'{prefix}' must start and end with '/' (e.g., '/api/')"),
            });
        }
        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
