// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted request context.
//!
//! The gate resolves options (possibly per request) and verifies machine
//! tokens; handlers running later in the same logical request read that work
//! back from a single header instead of redoing it.
//!
//! ## Wire format
//!
//! `v1.<base64url(nonce || ciphertext || tag)>`
//!
//! - AES-256-GCM, 96-bit random nonce, the `v1` prefix as associated data
//! - Key = HMAC-SHA256(operator key, `request-context/v1`)
//!
//! ## Failure model
//!
//! Without an encryption key the header is simply omitted; nothing is ever
//! sealed with an implicit key. Anything that does not open cleanly and match
//! the payload schema decodes to `None`, and readers fall back to the raw
//! request headers.

use std::sync::{Arc, OnceLock};

use axum::http::HeaderMap;
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::auth::tokens::MachineIdentity;
use crate::error::ConfigError;
use crate::keys::SecretKey;
use crate::options::{AuthOptions, OptionsOverride};

/// Header carrying the sealed context to downstream stages.
pub const REQUEST_DATA_HEADER: &str = "x-auth-request-data";

const CONTEXT_VERSION: u8 = 1;
const VERSION_PREFIX: &str = "v1.";
const KEY_INFO: &[u8] = b"request-context/v1";

/// What the gate hands to downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagatedContext {
    pub version: u8,
    pub publishable_key: String,
    /// Present only when the secret key was supplied per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<SecretKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_up_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub is_satellite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineAuth>,
}

/// A machine token the gate already verified, bound to the token itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineAuth {
    pub token: String,
    pub identity: MachineIdentity,
}

impl PropagatedContext {
    /// Context for resolved options. `dynamic_secret` is set when the secret
    /// key came from a per-request callback and downstream has no other way
    /// to learn it.
    pub fn from_options(options: &AuthOptions, dynamic_secret: bool) -> Self {
        Self {
            version: CONTEXT_VERSION,
            publishable_key: options.publishable_key.as_str().to_string(),
            secret_key: dynamic_secret.then(|| options.secret_key.clone()),
            sign_in_url: options.sign_in_url.clone(),
            sign_up_url: options.sign_up_url.clone(),
            domain: options.domain.clone(),
            proxy_url: options.proxy_url.clone(),
            is_satellite: options.is_satellite,
            machine: None,
        }
    }

    pub fn with_machine(mut self, token: impl Into<String>, identity: MachineIdentity) -> Self {
        self.machine = Some(MachineAuth {
            token: token.into(),
            identity,
        });
        self
    }

    pub fn carries_secrets(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Machine identity verified for exactly this token.
    pub fn machine_for(&self, token: &str) -> Option<&MachineIdentity> {
        self.machine
            .as_ref()
            .filter(|m| m.token == token)
            .map(|m| &m.identity)
    }

    /// Rebuild the options the gate resolved, on top of static options.
    pub fn resolve_options(&self, base: &AuthOptions) -> Result<AuthOptions, ConfigError> {
        let mut options = base.clone();
        options.apply(OptionsOverride {
            publishable_key: Some(self.publishable_key.clone()),
            secret_key: self.secret_key.as_ref().map(|k| k.expose().to_string()),
            sign_in_url: self.sign_in_url.clone(),
            sign_up_url: self.sign_up_url.clone(),
            domain: self.domain.clone(),
            proxy_url: self.proxy_url.clone(),
            is_satellite: Some(self.is_satellite),
            ..Default::default()
        })?;
        Ok(options)
    }
}

/// Seals and opens [`PropagatedContext`] header values.
#[derive(Clone, Default)]
pub struct RequestContextCodec {
    key: Option<Arc<LessSafeKey>>,
}

impl std::fmt::Debug for RequestContextCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContextCodec")
            .field("enabled", &self.key.is_some())
            .finish()
    }
}

impl RequestContextCodec {
    /// Codec keyed by an operator-supplied key, or a disabled codec.
    pub fn new(operator_key: Option<&str>) -> Result<Self, ConfigError> {
        let Some(operator_key) = operator_key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(Self::default());
        };

        let mut mac = Hmac::<Sha256>::new_from_slice(operator_key.as_bytes())
            .map_err(|e| ConfigError::ContextSerialization(e.to_string()))?;
        mac.update(KEY_INFO);
        let derived = mac.finalize().into_bytes();

        let unbound = UnboundKey::new(&AES_256_GCM, &derived)
            .map_err(|_| ConfigError::ContextSerialization("key derivation failed".to_string()))?;
        Ok(Self {
            key: Some(Arc::new(LessSafeKey::new(unbound))),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Seal a context into a header value.
    ///
    /// `Ok(None)` means no key is configured and the header should be
    /// omitted. Refuses to drop a context that carries secrets.
    pub fn encrypt(&self, payload: &PropagatedContext) -> Result<Option<String>, ConfigError> {
        let Some(key) = &self.key else {
            if payload.carries_secrets() {
                return Err(ConfigError::MissingEncryptionKey);
            }
            return Ok(None);
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| ConfigError::ContextSerialization("nonce generation failed".to_string()))?;

        let mut in_out = serde_json::to_vec(payload)
            .map_err(|e| ConfigError::ContextSerialization(e.to_string()))?;
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(VERSION_PREFIX.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| ConfigError::ContextSerialization("sealing failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(Some(format!(
            "{VERSION_PREFIX}{}",
            Base64UrlUnpadded::encode_string(&sealed)
        )))
    }

    /// Open a header value. Never fails loudly.
    pub fn decrypt(&self, value: &str) -> Option<PropagatedContext> {
        let key = self.key.as_ref()?;
        let encoded = value.trim().strip_prefix(VERSION_PREFIX)?;
        let mut bytes = Base64UrlUnpadded::decode_vec(encoded).ok()?;
        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return None;
        }

        let (nonce_bytes, sealed) = bytes.split_at_mut(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
        let plaintext = key
            .open_in_place(nonce, Aad::from(VERSION_PREFIX.as_bytes()), sealed)
            .ok()?;

        let context: PropagatedContext = serde_json::from_slice(plaintext).ok()?;
        (context.version == CONTEXT_VERSION).then_some(context)
    }
}

/// Per-request view of the propagated context, decrypted at most once.
///
/// Lives in request extensions; cloning shares the memo.
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    codec: RequestContextCodec,
    header: Option<String>,
    decoded: OnceLock<Option<PropagatedContext>>,
}

impl RequestScope {
    pub fn new(codec: RequestContextCodec, header: Option<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                codec,
                header,
                decoded: OnceLock::new(),
            }),
        }
    }

    pub fn from_headers(codec: RequestContextCodec, headers: &HeaderMap) -> Self {
        let header = headers
            .get(REQUEST_DATA_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self::new(codec, header)
    }

    /// The decrypted context, if the header was present and valid.
    pub fn context(&self) -> Option<&PropagatedContext> {
        self.inner
            .decoded
            .get_or_init(|| {
                self.inner
                    .header
                    .as_deref()
                    .and_then(|h| self.inner.codec.decrypt(h))
            })
            .as_ref()
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("has_header", &self.inner.header.is_some())
            .field("decoded", &self.inner.decoded.get().map(Option::is_some))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::TokenType;
    use crate::options::tests::test_options;

    const KEY: &str = "operator-encryption-key-0001";

    fn codec() -> RequestContextCodec {
        RequestContextCodec::new(Some(KEY)).unwrap()
    }

    fn machine_identity() -> MachineIdentity {
        MachineIdentity {
            token_type: TokenType::ApiKey,
            id: "ak_rec_1".to_string(),
            subject: "user_9".to_string(),
            name: Some("ci".to_string()),
            scopes: vec!["read".to_string()],
            claims: Default::default(),
        }
    }

    fn payload() -> PropagatedContext {
        PropagatedContext::from_options(&test_options().with_sign_in_url("/sign-in"), false)
            .with_machine("ak_live_secret", machine_identity())
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let header = codec.encrypt(&payload()).unwrap().unwrap();
        assert!(header.starts_with("v1."));
        assert_eq!(codec.decrypt(&header), Some(payload()));
    }

    #[test]
    fn nonce_makes_headers_differ() {
        let codec = codec();
        let a = codec.encrypt(&payload()).unwrap().unwrap();
        let b = codec.encrypt(&payload()).unwrap().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_decrypts_to_none() {
        let codec = codec();
        for value in [
            "",
            "v1.",
            "v1.!!!",
            "v2.AAAA",
            "v1.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "plain",
        ] {
            assert_eq!(codec.decrypt(value), None, "{value}");
        }
    }

    #[test]
    fn wrong_key_decrypts_to_none() {
        let header = codec().encrypt(&payload()).unwrap().unwrap();
        let other = RequestContextCodec::new(Some("a-different-operator-key")).unwrap();
        assert_eq!(other.decrypt(&header), None);
    }

    #[test]
    fn tampered_header_decrypts_to_none() {
        let codec = codec();
        let header = codec.encrypt(&payload()).unwrap().unwrap();
        let mut bytes = header.into_bytes();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(codec.decrypt(&tampered), None);
    }

    #[test]
    fn schema_mismatch_is_discarded() {
        let codec = codec();
        let key = codec.key.as_ref().unwrap();
        let mut in_out = br#"{"version":1,"publishable_key":"pk","unexpected":true}"#.to_vec();
        let nonce = [7u8; NONCE_LEN];
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(VERSION_PREFIX.as_bytes()),
            &mut in_out,
        )
        .unwrap();
        let mut sealed = nonce.to_vec();
        sealed.extend(in_out);
        let header = format!("v1.{}", Base64UrlUnpadded::encode_string(&sealed));
        assert_eq!(codec.decrypt(&header), None);
    }

    #[test]
    fn no_key_omits_header() {
        let codec = RequestContextCodec::new(None).unwrap();
        assert!(!codec.is_enabled());
        assert_eq!(codec.encrypt(&payload()).unwrap(), None);
        assert_eq!(codec.decrypt("v1.AAAA"), None);

        let blank = RequestContextCodec::new(Some("  ")).unwrap();
        assert!(!blank.is_enabled());
    }

    #[test]
    fn no_key_with_dynamic_secret_fails_closed() {
        let codec = RequestContextCodec::new(None).unwrap();
        let secret_payload = PropagatedContext::from_options(&test_options(), true);
        assert!(matches!(
            codec.encrypt(&secret_payload),
            Err(ConfigError::MissingEncryptionKey)
        ));
    }

    #[test]
    fn machine_identity_is_bound_to_token() {
        let ctx = payload();
        assert!(ctx.machine_for("ak_live_secret").is_some());
        assert!(ctx.machine_for("ak_live_other").is_none());
    }

    #[test]
    fn scope_memoizes_and_repeats() {
        let codec = codec();
        let header = codec.encrypt(&payload()).unwrap();
        let scope = RequestScope::new(codec, header);
        let first = scope.context().cloned();
        let second = scope.context().cloned();
        assert!(first.is_some());
        assert_eq!(first, second);

        let shared = scope.clone();
        assert_eq!(shared.context().cloned(), first);
    }

    #[test]
    fn scope_without_header_is_empty() {
        let scope = RequestScope::from_headers(codec(), &HeaderMap::new());
        assert!(scope.context().is_none());
    }

    #[test]
    fn resolve_options_restores_overrides() {
        let base = test_options();
        let tenant = base.clone().with_sign_in_url("/tenant/sign-in");
        let ctx = PropagatedContext::from_options(&tenant, false);
        let resolved = ctx.resolve_options(&base).unwrap();
        assert_eq!(resolved.sign_in_url(), "/tenant/sign-in");
        assert_eq!(resolved.secret_key, base.secret_key);
    }
}
