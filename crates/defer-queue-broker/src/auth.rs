//! Access-key authentication for broker connections

use crate::config::{AccessKeyConfig, AuthConfig};
use bcrypt::verify;
use defer_queue_core::QueueError;
use std::collections::HashMap;
use tracing::{debug, warn};

/// What an authenticated connection may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AnyOwner,
    Owner(String),
}

impl Grant {
    pub fn allows(&self, owner: Option<&str>) -> bool {
        match self {
            Grant::AnyOwner => true,
            Grant::Owner(granted) => owner == Some(granted.as_str()),
        }
    }
}

pub struct Authenticator {
    enabled: bool,
    keys: HashMap<String, AccessKeyConfig>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let keys = config
            .access_keys
            .iter()
            .map(|key| (key.access_key.clone(), key.clone()))
            .collect();
        Authenticator {
            enabled: config.enabled,
            keys,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check a key pair. With auth disabled every pair is accepted.
    pub fn authenticate(&self, access_key: &str, secret_key: &str) -> Result<Grant, QueueError> {
        if !self.enabled {
            return Ok(Grant::AnyOwner);
        }

        let key = self.keys.get(access_key).ok_or_else(|| {
            warn!(access_key = %access_key, "Unknown access key");
            QueueError::Unauthorized(format!("unknown access key {}", access_key))
        })?;

        let valid = verify(secret_key, &key.secret_hash)
            .map_err(|e| QueueError::Unauthorized(format!("cannot verify secret: {}", e)))?;
        if !valid {
            warn!(access_key = %access_key, "Secret key mismatch");
            return Err(QueueError::Unauthorized(format!(
                "invalid secret for access key {}",
                access_key
            )));
        }

        debug!(access_key = %access_key, "Connection authenticated");
        Ok(match &key.owner {
            Some(owner) => Grant::Owner(owner.clone()),
            None => Grant::AnyOwner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcrypt::hash;

    fn config(owner: Option<&str>) -> AuthConfig {
        AuthConfig {
            enabled: true,
            access_keys: vec![AccessKeyConfig {
                access_key: "AK".to_string(),
                secret_hash: hash("secret", 4).unwrap(),
                owner: owner.map(str::to_string),
            }],
        }
    }

    #[test]
    fn test_valid_secret() {
        let auth = Authenticator::new(&config(Some("acct")));
        let grant = auth.authenticate("AK", "secret").unwrap();
        assert!(grant.allows(Some("acct")));
        assert!(!grant.allows(None));
        assert!(!grant.allows(Some("other")));
    }

    #[test]
    fn test_bad_secret_and_unknown_key() {
        let auth = Authenticator::new(&config(None));
        assert!(matches!(
            auth.authenticate("AK", "wrong"),
            Err(QueueError::Unauthorized(_))
        ));
        assert!(matches!(
            auth.authenticate("nobody", "secret"),
            Err(QueueError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = Authenticator::new(&AuthConfig::default());
        assert_eq!(auth.authenticate("", "").unwrap(), Grant::AnyOwner);
    }
}
