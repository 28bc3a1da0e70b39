//! Credential pool with a single forward-only rotation pointer
//!
//! Workers that observe quota exhaustion report the credential they used.
//! The pointer advances only when it still points at that credential, so a
//! burst of concurrent reports for one credential moves it exactly one step.
//! Once the pointer passes the last credential the pool stays exhausted.

use crate::ConfigError;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// One API credential and its position in the pool
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    position: usize,
    key: Arc<str>,
}

impl Credential {
    /// Zero-based position in the pool
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("position", &self.position)
            .field("key", &mask(&self.key))
            .finish()
    }
}

/// Result of reporting an exhausted credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// This caller advanced the pointer to a fresh credential
    Rotated(Credential),

    /// Another worker already moved past the reported credential
    Superseded(Credential),

    /// No credentials remain
    Exhausted,
}

/// Ordered credentials behind one lock-guarded rotation index
pub struct CredentialPool {
    keys: Vec<Arc<str>>,
    index: Mutex<usize>,
}

impl CredentialPool {
    /// Creates a pool, rejecting an empty or blank credential list
    pub fn new(keys: Vec<String>) -> Result<Self, ConfigError> {
        let keys: Vec<Arc<str>> = keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(Arc::from)
            .collect();

        if keys.is_empty() {
            return Err(ConfigError::NoCredentials);
        }

        Ok(Self {
            keys,
            index: Mutex::new(0),
        })
    }

    /// Credential to use for the next request, `None` once exhausted
    pub fn current(&self) -> Option<Credential> {
        let index = self.lock();
        self.credential_at(*index)
    }

    /// Reports that `used` ran out of quota
    ///
    /// Advances the pointer only if it still equals `used`'s position.
    pub fn report_exhausted(&self, used: &Credential) -> Rotation {
        let mut index = self.lock();

        if *index == used.position {
            *index += 1;
            return match self.credential_at(*index) {
                Some(next) => {
                    tracing::warn!(
                        "Credential quota exhausted, switching to key {}/{}",
                        next.position + 1,
                        self.keys.len()
                    );
                    Rotation::Rotated(next)
                }
                None => {
                    tracing::error!("All {} credentials exhausted", self.keys.len());
                    Rotation::Exhausted
                }
            };
        }

        match self.credential_at(*index) {
            Some(next) => Rotation::Superseded(next),
            None => Rotation::Exhausted,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        *self.lock() >= self.keys.len()
    }

    /// Current value of the rotation index; never exceeds `len()`
    pub fn position(&self) -> usize {
        *self.lock()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn credential_at(&self, position: usize) -> Option<Credential> {
        self.keys.get(position).map(|key| Credential {
            position,
            key: Arc::clone(key),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("len", &self.keys.len())
            .field("position", &self.position())
            .finish()
    }
}

/// Shows only the first few characters of a key
fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}…", visible)
}
