// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Publishable and secret key handling.
//!
//! A publishable key is `pk_test_` or `pk_live_` followed by the base64
//! encoding of `<frontend api host>$`. The prefix decides whether the
//! instance is a development or production one; the host is where
//! handshakes are sent.

use std::fmt;

use base64ct::{Base64, Base64Unpadded, Encoding};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const TEST_PREFIX: &str = "pk_test_";
const LIVE_PREFIX: &str = "pk_live_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Development,
    Production,
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceType::Development => write!(f, "development"),
            InstanceType::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishableKey {
    raw: String,
    instance_type: InstanceType,
    frontend_api: String,
}

impl PublishableKey {
    pub fn parse(key: &str) -> Result<Self, ConfigError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MissingPublishableKey);
        }

        let (instance_type, encoded) = if let Some(rest) = key.strip_prefix(TEST_PREFIX) {
            (InstanceType::Development, rest)
        } else if let Some(rest) = key.strip_prefix(LIVE_PREFIX) {
            (InstanceType::Production, rest)
        } else {
            return Err(ConfigError::InvalidPublishableKey(
                "expected a pk_test_ or pk_live_ prefix".to_string(),
            ));
        };

        let decoded = Base64::decode_vec(encoded)
            .or_else(|_| Base64Unpadded::decode_vec(encoded))
            .map_err(|_| ConfigError::InvalidPublishableKey("payload is not base64".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| ConfigError::InvalidPublishableKey("payload is not UTF-8".to_string()))?;
        let frontend_api = decoded
            .strip_suffix('$')
            .filter(|host| !host.is_empty() && !host.contains('$'))
            .ok_or_else(|| {
                ConfigError::InvalidPublishableKey("payload must be `<host>$`".to_string())
            })?;

        Ok(Self {
            raw: key.to_string(),
            instance_type,
            frontend_api: frontend_api.to_string(),
        })
    }

    /// Build a key for a frontend API host.
    pub fn build(frontend_api: &str, instance_type: InstanceType) -> String {
        let prefix = match instance_type {
            InstanceType::Development => TEST_PREFIX,
            InstanceType::Production => LIVE_PREFIX,
        };
        format!("{prefix}{}", Base64::encode_string(format!("{frontend_api}$").as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }

    pub fn is_development(&self) -> bool {
        self.instance_type == InstanceType::Development
    }

    /// Frontend API host, e.g. `clerk.example.com`.
    pub fn frontend_api(&self) -> &str {
        &self.frontend_api
    }

    /// Hosted sign-in page used when no sign-in URL is configured.
    pub fn account_portal_url(&self, page: &str) -> String {
        let root = self
            .frontend_api
            .split_once('.')
            .map_or(self.frontend_api.as_str(), |(_, rest)| rest);
        format!("https://accounts.{root}/{page}")
    }
}

/// Secret key wrapper that never prints its value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Representation safe to log: prefix and last four characters.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey({})", self.redacted())
    }
}

pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let prefix: String = chars[..8].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}****{suffix}")
}
