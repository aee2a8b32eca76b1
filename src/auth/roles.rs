// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Organization roles and permissions for authorization.

use super::claims::SessionClaims;

const ORG_PREFIX: &str = "org:";

/// Normalize an organization role or permission key.
///
/// Keys may be written with or without the `org:` prefix (`admin` and
/// `org:admin` are the same role); tokens always carry the prefixed form.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with(ORG_PREFIX) {
        key.to_string()
    } else {
        format!("{ORG_PREFIX}{key}")
    }
}

/// Authorization view over a signed-in identity.
///
/// Only session identities hold roles and permissions; a machine identity
/// answers `false` to every check.
#[derive(Debug, Clone, Copy)]
pub struct Has<'a> {
    claims: Option<&'a SessionClaims>,
}

impl<'a> Has<'a> {
    pub fn new(claims: Option<&'a SessionClaims>) -> Self {
        Self { claims }
    }

    pub fn role(&self, role: &str) -> bool {
        let wanted = normalize_key(role);
        self.claims
            .and_then(|c| c.org_role.as_deref())
            .is_some_and(|r| normalize_key(r) == wanted)
    }

    pub fn permission(&self, permission: &str) -> bool {
        let wanted = normalize_key(permission);
        self.claims
            .is_some_and(|c| c.org_permissions.iter().any(|p| normalize_key(p) == wanted))
    }
}
