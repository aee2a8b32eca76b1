// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session JWT verification and the signature binding stamped tokens to the
//! secret key.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Validation};
use sha2::Sha256;

use super::claims::SessionClaims;
use super::error::TokenVerificationError;
use super::jwks::KeyStore;
use crate::keys::SecretKey;
use crate::options::AuthOptions;

type HmacSha256 = Hmac<Sha256>;

/// Verify a session JWT: signature, `exp`/`nbf` within the configured clock
/// skew, and the `azp` claim against the authorized parties.
///
/// CPU-only; keys come from the [`KeyStore`] snapshot.
pub fn verify_session_token(
    token: &str,
    keys: &KeyStore,
    options: &AuthOptions,
) -> Result<SessionClaims, TokenVerificationError> {
    let header = decode_header(token).map_err(|_| TokenVerificationError::MalformedToken)?;
    let (decoding_key, algorithm) = keys.decoding_key(header.kid.as_deref())?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = options.clock_skew.as_secs();
    validation.validate_nbf = true;
    validation.validate_aud = false;

    let claims = decode::<SessionClaims>(token, &decoding_key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenVerificationError::TokenExpired,
            ErrorKind::InvalidSignature => TokenVerificationError::InvalidSignature,
            ErrorKind::ImmatureSignature => TokenVerificationError::TokenNotYetValid,
            _ => TokenVerificationError::MalformedToken,
        })?
        .claims;

    if !options.authorized_parties.is_empty() {
        if let Some(azp) = &claims.azp {
            if !options.authorized_parties.iter().any(|p| p == azp) {
                return Err(TokenVerificationError::UnauthorizedParty(azp.clone()));
            }
        }
    }

    Ok(claims)
}

/// Decode a JWT payload without checking anything.
///
/// Used only to compare `iat` with the client timestamp before paying for a
/// signature check, and downstream on tokens whose signature binding was
/// already checked.
pub fn decode_unverified(token: &str) -> Result<SessionClaims, TokenVerificationError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenVerificationError::MalformedToken);
    };
    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|_| TokenVerificationError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenVerificationError::MalformedToken)
}

/// `base64url(HMAC-SHA256(secret key, token))`, stamped next to the token so
/// downstream stages can tell it came from the gate.
pub fn sign_token(token: &str, secret: &SecretKey) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
        return String::new();
    };
    mac.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
}

/// Constant-time check of a signature produced by [`sign_token`].
pub fn verify_signature(token: &str, signature: &str, secret: &SecretKey) -> bool {
    let Ok(expected) = Base64UrlUnpadded::decode_vec(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
        return false;
    };
    mac.update(token.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::claims::tests::sample_claims;
    use crate::auth::jwks::tests::{loaded_jwks_store, static_store};
    use crate::options::tests::test_options;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const SIGNING_KEY_PEM: &str = include_str!("fixtures/session_signing_key.pem");
    const FOREIGN_KEY_PEM: &str = include_str!("fixtures/foreign_signing_key.pem");

    pub(crate) fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Claims issued at `iat`, valid for an hour.
    pub(crate) fn claims_issued_at(iat: i64) -> SessionClaims {
        SessionClaims {
            iat,
            exp: iat + 3600,
            ..sample_claims()
        }
    }

    fn sign_with(pem: &str, claims: &SessionClaims) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("ins_test_1".to_string());
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    pub(crate) fn sign_session(claims: &SessionClaims) -> String {
        sign_with(SIGNING_KEY_PEM, claims)
    }

    pub(crate) fn sign_foreign(claims: &SessionClaims) -> String {
        sign_with(FOREIGN_KEY_PEM, claims)
    }

    #[test]
    fn verifies_fresh_token_with_static_key() {
        let token = sign_session(&claims_issued_at(now()));
        let claims = verify_session_token(&token, &static_store(), &test_options()).unwrap();
        assert_eq!(claims.sub, "user_123");
    }

    #[test]
    fn verifies_fresh_token_with_jwks() {
        let token = sign_session(&claims_issued_at(now()));
        let claims = verify_session_token(&token, &loaded_jwks_store(), &test_options()).unwrap();
        assert_eq!(claims.sid.as_deref(), Some("sess_abc"));
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = sign_foreign(&claims_issued_at(now()));
        let err = verify_session_token(&token, &static_store(), &test_options()).unwrap_err();
        assert_eq!(err, TokenVerificationError::InvalidSignature);
    }

    #[test]
    fn rejects_expired_token_beyond_skew() {
        let token = sign_session(&claims_issued_at(now() - 7200));
        let err = verify_session_token(&token, &static_store(), &test_options()).unwrap_err();
        assert!(err.is_expired());
    }

    #[test]
    fn issuer_is_taken_from_the_token() {
        let claims = SessionClaims {
            iss: "https://clerk.satellite.example.org".to_string(),
            ..claims_issued_at(now())
        };
        let token = sign_session(&claims);
        let verified = verify_session_token(&token, &static_store(), &test_options()).unwrap();
        assert_eq!(verified.iss, "https://clerk.satellite.example.org");
    }

    #[test]
    fn rejects_garbage() {
        let err = verify_session_token("abc", &static_store(), &test_options()).unwrap_err();
        assert_eq!(err, TokenVerificationError::MalformedToken);
    }

    #[test]
    fn authorized_parties_are_enforced() {
        let claims = SessionClaims {
            azp: Some("https://evil.example".to_string()),
            ..claims_issued_at(now())
        };
        let token = sign_session(&claims);
        let options =
            test_options().with_authorized_parties(vec!["https://app.example.com".to_string()]);
        let err = verify_session_token(&token, &static_store(), &options).unwrap_err();
        assert!(matches!(
            err,
            TokenVerificationError::UnauthorizedParty(p) if p == "https://evil.example"
        ));

        let allowed = SessionClaims {
            azp: Some("https://app.example.com".to_string()),
            ..claims_issued_at(now())
        };
        let token = sign_session(&allowed);
        assert!(verify_session_token(&token, &static_store(), &options).is_ok());
    }

    #[test]
    fn decode_unverified_reads_iat() {
        let token = sign_foreign(&claims_issued_at(1234));
        assert_eq!(decode_unverified(&token).unwrap().iat, 1234);
        assert!(decode_unverified("a.b").is_err());
        assert!(decode_unverified("a.!!!.c").is_err());
    }

    #[test]
    fn signature_binds_token_to_secret() {
        let options = test_options();
        let sig = sign_token("tok", &options.secret_key);
        assert!(verify_signature("tok", &sig, &options.secret_key));
        assert!(!verify_signature("tok2", &sig, &options.secret_key));

        let other = SecretKey::new("sk_test_another_secret_key").unwrap();
        assert!(!verify_signature("tok", &sig, &other));
        assert!(!verify_signature("tok", "%%%", &options.secret_key));
    }
}
