// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token types, acceptance rules and machine token identities.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BoxFuture;

const API_KEY_PREFIX: &str = "ak_";
const OAUTH_TOKEN_PREFIX: &str = "oat_";
const M2M_TOKEN_PREFIX: &str = "mt_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    SessionToken,
    ApiKey,
    OauthToken,
    M2mToken,
}

impl TokenType {
    /// Classify a bearer credential by its prefix. Anything without a
    /// machine prefix is treated as a session JWT.
    pub fn classify(token: &str) -> Self {
        if token.starts_with(API_KEY_PREFIX) {
            TokenType::ApiKey
        } else if token.starts_with(OAUTH_TOKEN_PREFIX) {
            TokenType::OauthToken
        } else if token.starts_with(M2M_TOKEN_PREFIX) {
            TokenType::M2mToken
        } else {
            TokenType::SessionToken
        }
    }

    pub fn is_machine(self) -> bool {
        self != TokenType::SessionToken
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::SessionToken => "session_token",
            TokenType::ApiKey => "api_key",
            TokenType::OauthToken => "oauth_token",
            TokenType::M2mToken => "m2m_token",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "session_token" => Some(TokenType::SessionToken),
            "api_key" => Some(TokenType::ApiKey),
            "oauth_token" => Some(TokenType::OauthToken),
            "m2m_token" => Some(TokenType::M2mToken),
            _ => None,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which token types a caller is willing to accept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcceptsToken {
    /// Any machine or session token.
    #[default]
    Any,
    One(TokenType),
    AnyOf(Vec<TokenType>),
}

impl AcceptsToken {
    pub fn session() -> Self {
        AcceptsToken::One(TokenType::SessionToken)
    }

    pub fn accepts(&self, token_type: TokenType) -> bool {
        match self {
            AcceptsToken::Any => true,
            AcceptsToken::One(t) => *t == token_type,
            AcceptsToken::AnyOf(types) => types.contains(&token_type),
        }
    }
}

impl From<TokenType> for AcceptsToken {
    fn from(token_type: TokenType) -> Self {
        AcceptsToken::One(token_type)
    }
}

impl From<Vec<TokenType>> for AcceptsToken {
    fn from(types: Vec<TokenType>) -> Self {
        AcceptsToken::AnyOf(types)
    }
}

impl fmt::Display for AcceptsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptsToken::Any => f.write_str("any"),
            AcceptsToken::One(t) => write!(f, "{t}"),
            AcceptsToken::AnyOf(types) => {
                let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                write!(f, "[{}]", names.join(","))
            }
        }
    }
}

/// Identity behind a verified machine token.
///
/// Produced at the edge by a [`MachineTokenVerifier`] and carried to
/// downstream handlers inside the encrypted request context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineIdentity {
    pub token_type: TokenType,
    /// Token record ID.
    pub id: String,
    /// User, organization or machine the token acts for.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineVerifyError {
    #[error("machine token was rejected: {0}")]
    Rejected(String),

    #[error("machine token verification is unavailable: {0}")]
    Unavailable(String),
}

/// Verifies machine tokens at the edge.
///
/// This is the only network-bound step of authentication and only runs
/// for requests presenting a machine bearer token.
pub trait MachineTokenVerifier: Send + Sync + 'static {
    fn verify<'a>(
        &'a self,
        token: &'a str,
        token_type: TokenType,
    ) -> BoxFuture<'a, Result<MachineIdentity, MachineVerifyError>>;
}
