// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims and the identities a signed-in request carries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::roles::Has;
use super::tokens::{MachineIdentity, TokenType};

/// Claims carried by a session JWT.
///
/// Standard registered claims plus the active organization claims used for
/// role and permission checks. Unknown claims are kept in `extra` so custom
/// session claims reach application code untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID).
    pub sub: String,

    /// Issued at timestamp.
    #[serde(default)]
    pub iat: i64,

    /// Expiration timestamp.
    #[serde(default)]
    pub exp: i64,

    /// Not before timestamp (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issuer (the frontend API URL).
    #[serde(default)]
    pub iss: String,

    /// Session ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Authorized party (origin that requested the token).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Active organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_slug: Option<String>,

    /// Role in the active organization, e.g. `org:admin`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_role: Option<String>,

    /// Permissions in the active organization, e.g. `org:invoices:create`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub org_permissions: Vec<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Who a signed-in request is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Session(SessionClaims),
    Machine(MachineIdentity),
}

/// A successfully authenticated request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    /// User ID for sessions, token subject for machine tokens.
    pub subject_id: String,
    pub session_id: Option<String>,
    pub token_type: TokenType,
    pub identity: Identity,
    /// The raw credential, needed to stamp downstream headers.
    pub token: String,
}

impl SignedIn {
    pub fn from_session(token: impl Into<String>, claims: SessionClaims) -> Self {
        Self {
            subject_id: claims.sub.clone(),
            session_id: claims.sid.clone(),
            token_type: TokenType::SessionToken,
            identity: Identity::Session(claims),
            token: token.into(),
        }
    }

    pub fn from_machine(token: impl Into<String>, identity: MachineIdentity) -> Self {
        Self {
            subject_id: identity.subject.clone(),
            session_id: None,
            token_type: identity.token_type,
            identity: Identity::Machine(identity),
            token: token.into(),
        }
    }

    pub fn session_claims(&self) -> Option<&SessionClaims> {
        match &self.identity {
            Identity::Session(claims) => Some(claims),
            Identity::Machine(_) => None,
        }
    }

    pub fn machine(&self) -> Option<&MachineIdentity> {
        match &self.identity {
            Identity::Machine(identity) => Some(identity),
            Identity::Session(_) => None,
        }
    }

    /// Authorization checks against this identity.
    pub fn has(&self) -> Has<'_> {
        Has::new(self.session_claims())
    }
}
