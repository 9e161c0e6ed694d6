//! Secrets for the privileged executor.
//!
//! A [`SecretVault`] has no public way to read its values. It is moved into
//! [`DispatchAuthorizer::authorize`](crate::gate::DispatchAuthorizer::authorize)
//! and only a `Proceed` decision hands it on, inside a
//! [`Grant`](crate::gate::Grant). A rejected dispatch drops the vault.
//!
//! Every read through a grant is counted by the vault's [`SecretAudit`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// A secret string. `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        SecretValue(value.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Shared counter of secret reads, observable after the vault is gone.
#[derive(Debug, Clone, Default)]
pub struct SecretAudit {
    reads: Arc<AtomicU64>,
}

impl SecretAudit {
    /// Number of individual secret values read so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn record(&self, name: &str) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        debug!(secret = %name, "secret read");
    }
}

/// Environment variable missing when loading a vault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("secret environment variable not set: {0}")]
pub struct MissingSecret(pub String);

/// Named secrets destined for the privileged executor's environment.
#[derive(Debug, Default)]
pub struct SecretVault {
    secrets: BTreeMap<String, SecretValue>,
    audit: SecretAudit,
}

impl SecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the named variables from the process environment.
    pub fn from_env<I, S>(names: I) -> Result<Self, MissingSecret>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vault = SecretVault::new();
        for name in names {
            let name = name.as_ref();
            let value = std::env::var(name).map_err(|_| MissingSecret(name.to_string()))?;
            vault.insert(name, SecretValue::new(value));
        }
        Ok(vault)
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, SecretValue::new(value));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.secrets.insert(name.into(), value);
    }

    /// Secret names (values stay sealed).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Audit handle that outlives the vault.
    pub fn audit(&self) -> SecretAudit {
        self.audit.clone()
    }

    pub(crate) fn read_all(&self) -> Vec<(String, String)> {
        self.secrets
            .iter()
            .map(|(name, value)| {
                self.audit.record(name);
                (name.clone(), value.expose().to_string())
            })
            .collect()
    }
}
