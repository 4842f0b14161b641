//! Secret loading for the ERP OAuth client.
//!
//! Secrets are read from the 1Password CLI first and fall back to environment
//! variables when allowed. Everything is returned as `Zeroizing<String>` so it
//! is wiped from memory when dropped.

use crate::domain::entities::credential::ClientCredentials;
use std::env;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("1Password CLI error: {0}")]
    OnePasswordError(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone)]
pub struct SecretConfig {
    /// Allow environment variables as a fallback. Should be false in production.
    pub allow_env_vars: bool,

    /// Fail instead of falling back when the 1Password CLI is unavailable.
    pub require_op_cli: bool,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            allow_env_vars: cfg!(debug_assertions),
            require_op_cli: false,
        }
    }
}

impl SecretConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("SECRETS_ALLOW_ENV") {
            config.allow_env_vars = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(v) = env::var("SECRETS_REQUIRE_OP_CLI") {
            config.require_op_cli = v.eq_ignore_ascii_case("true") || v == "1";
        }
        config
    }
}

/// Load a secret from the 1Password CLI or, when allowed, an environment variable.
///
/// `op_reference` looks like `op://vault/item/field`.
pub fn load_secret(
    op_reference: &str,
    env_var_name: &str,
    config: &SecretConfig,
) -> Result<Zeroizing<String>, SecretError> {
    match load_from_op_cli(op_reference) {
        Ok(secret) => {
            info!("✓ Loaded secret from 1Password CLI: {}", env_var_name);
            return Ok(secret);
        }
        Err(e) => {
            if config.require_op_cli {
                error!("1Password CLI required but failed: {}", e);
                return Err(e);
            }
            warn!("1Password CLI not available: {}", e);
        }
    }

    if config.allow_env_vars {
        warn!(
            "⚠️  Loading secret from environment variable: {} (INSECURE for production)",
            env_var_name
        );
        load_from_env(env_var_name)
    } else {
        error!(
            "Secret loading failed: 1Password CLI unavailable and env vars disabled for {}",
            env_var_name
        );
        Err(SecretError::NotFound(env_var_name.to_string()))
    }
}

fn load_from_op_cli(reference: &str) -> Result<Zeroizing<String>, SecretError> {
    use std::process::Command;

    let output = Command::new("op")
        .arg("read")
        .arg(reference)
        .output()
        .map_err(|e| {
            SecretError::OnePasswordError(format!(
                "Failed to execute 'op' command: {}. Install 1Password CLI from https://developer.1password.com/docs/cli",
                e
            ))
        })?;

    if !output.status.success() {
        let error_msg = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::OnePasswordError(format!(
            "1Password CLI failed: {}",
            error_msg
        )));
    }

    let secret = String::from_utf8(output.stdout)
        .map_err(|e| SecretError::OnePasswordError(format!("Invalid UTF-8 from 1Password: {}", e)))?
        .trim()
        .to_string();

    if secret.is_empty() {
        return Err(SecretError::OnePasswordError(
            "1Password returned empty secret".to_string(),
        ));
    }

    Ok(Zeroizing::new(secret))
}

fn load_from_env(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    match env::var(env_var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(Zeroizing::new(value.trim().to_string())),
        _ => Err(SecretError::EnvVarNotSet(env_var_name.to_string())),
    }
}

pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let weak_patterns = ["changeme", "placeholder", "example", "12345"];
    let secret_lower = secret.to_lowercase();

    for pattern in &weak_patterns {
        if secret_lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret contains weak pattern: {}",
                pattern
            )));
        }
    }

    Ok(())
}

/// Everything the credential manager needs at startup.
pub struct ErpSecrets {
    pub client: ClientCredentials,
    /// Refresh token used only when the store has no pair for the scope yet.
    pub bootstrap_refresh_token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ErpSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErpSecrets")
            .field("client_id", &self.client.client_id)
            .field("client_secret", &"<redacted>")
            .field("bootstrap_refresh_token", &self.bootstrap_refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn op_reference(env_name: &str, default: &str) -> String {
    env::var(env_name).unwrap_or_else(|_| default.to_string())
}

/// Load the OAuth client id and secret, plus an optional bootstrap refresh token.
pub fn load_erp_secrets(config: &SecretConfig) -> Result<ErpSecrets, SecretError> {
    let client_id = load_secret(
        &op_reference("ERP_CLIENT_ID_OP_REF", "op://ledgersync/erp/client_id"),
        "ERP_CLIENT_ID",
        config,
    )?;
    let client_secret = load_secret(
        &op_reference("ERP_CLIENT_SECRET_OP_REF", "op://ledgersync/erp/client_secret"),
        "ERP_CLIENT_SECRET",
        config,
    )?;
    validate_secret_strength(&client_secret, 16)?;

    let bootstrap_refresh_token = match load_secret(
        &op_reference("ERP_REFRESH_TOKEN_OP_REF", "op://ledgersync/erp/refresh_token"),
        "ERP_REFRESH_TOKEN",
        config,
    ) {
        Ok(token) => Some(token),
        Err(e) => {
            info!("No bootstrap refresh token available ({}), relying on stored credentials", e);
            None
        }
    };

    Ok(ErpSecrets {
        client: ClientCredentials {
            client_id: client_id.as_str().to_string(),
            client_secret,
        },
        bootstrap_refresh_token,
    })
}
