//! Endpoint security collaborator.
//!
//! The server never does cryptography itself. A [`SecurityProvider`] checks
//! the configured material before the listener is bound and describes the
//! endpoints that are advertised to clients.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use uanode_protocol::EndpointDescription;

use crate::config::SecurityConfig;

pub const SECURITY_POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

const KNOWN_POLICIES: &[&str] = &[
    "None",
    "Basic128Rsa15",
    "Basic256",
    "Basic256Sha256",
    "Aes128_Sha256_RsaOaep",
    "Aes256_Sha256_RsaPss",
];

const KNOWN_MODES: &[&str] = &["None", "Sign", "SignAndEncrypt"];

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("unknown security policy '{0}'")]
    UnknownPolicy(String),

    #[error("unknown security mode '{0}'")]
    UnknownMode(String),

    #[error("no security {0} configured")]
    Empty(&'static str),

    #[error("{kind} file {path} is not readable: {reason}")]
    MissingFile {
        kind: &'static str,
        path: String,
        reason: String,
    },
}

/// Prepares security material and describes the resulting endpoints.
pub trait SecurityProvider: Send + Sync {
    /// Called once during start, before the listener is bound.
    fn prepare(&self, config: &SecurityConfig) -> Result<(), SecurityError>;

    /// Endpoints advertised for `endpoint_url`.
    fn endpoints(&self, endpoint_url: &str, config: &SecurityConfig) -> Vec<EndpointDescription>;
}

/// Checks that configured certificate and key files exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSecurityProvider;

impl FileSecurityProvider {
    fn check_file(kind: &'static str, path: &Path) -> Result<(), SecurityError> {
        let missing = |reason: String| SecurityError::MissingFile {
            kind,
            path: path.display().to_string(),
            reason,
        };
        let meta = std::fs::metadata(path).map_err(|e| missing(e.to_string()))?;
        if !meta.is_file() {
            return Err(missing("not a regular file".to_string()));
        }
        Ok(())
    }
}

impl SecurityProvider for FileSecurityProvider {
    fn prepare(&self, config: &SecurityConfig) -> Result<(), SecurityError> {
        if config.policies.is_empty() {
            return Err(SecurityError::Empty("policies"));
        }
        if config.modes.is_empty() {
            return Err(SecurityError::Empty("modes"));
        }
        if let Some(p) = config
            .policies
            .iter()
            .find(|p| !KNOWN_POLICIES.contains(&p.as_str()))
        {
            return Err(SecurityError::UnknownPolicy(p.clone()));
        }
        if let Some(m) = config.modes.iter().find(|m| !KNOWN_MODES.contains(&m.as_str())) {
            return Err(SecurityError::UnknownMode(m.clone()));
        }

        if let Some(cert) = &config.certificate_file {
            Self::check_file("certificate", cert)?;
        }
        if let Some(key) = &config.private_key_file {
            Self::check_file("private key", key)?;
        }
        debug!(policies = ?config.policies, modes = ?config.modes, "security prepared");
        Ok(())
    }

    fn endpoints(&self, endpoint_url: &str, config: &SecurityConfig) -> Vec<EndpointDescription> {
        config
            .modes
            .iter()
            .flat_map(|mode| {
                config.policies.iter().map(move |policy| EndpointDescription {
                    endpoint_url: endpoint_url.to_string(),
                    security_mode: mode.clone(),
                    security_policy_uri: format!("{SECURITY_POLICY_URI_PREFIX}{policy}"),
                })
            })
            .collect()
    }
}
