// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and default values used
//! throughout the gate. Configuration is loaded from the environment at
//! startup by [`crate::options::AuthOptions::from_env`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH_PUBLISHABLE_KEY` | Publishable key (`pk_test_...` / `pk_live_...`) | Required |
//! | `AUTH_SECRET_KEY` | Secret key used to sign stamped auth headers | Required |
//! | `AUTH_JWT_KEY` | PEM public key for networkless session verification | Optional |
//! | `AUTH_JWKS_URL` | JWKS endpoint, used when `AUTH_JWT_KEY` is unset | Optional |
//! | `AUTH_ENCRYPTION_KEY` | Key for the propagated request context header | Optional |
//! | `AUTH_SIGN_IN_URL` | Sign-in page (absolute or path) | Account portal |
//! | `AUTH_SIGN_UP_URL` | Sign-up page (absolute or path) | Account portal |
//! | `AUTH_DOMAIN` | Satellite domain | None |
//! | `AUTH_PROXY_URL` | Frontend API proxy URL | None |
//! | `AUTH_IS_SATELLITE` | `true` when this deployment is a satellite | `false` |
//! | `AUTH_AUTHORIZED_PARTIES` | Comma separated list of accepted `azp` origins | None |
//! | `AUTH_DEBUG` | Emit one structured debug record per request | `false` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

pub const PUBLISHABLE_KEY_ENV: &str = "AUTH_PUBLISHABLE_KEY";
pub const SECRET_KEY_ENV: &str = "AUTH_SECRET_KEY";
pub const JWT_KEY_ENV: &str = "AUTH_JWT_KEY";
pub const JWKS_URL_ENV: &str = "AUTH_JWKS_URL";

/// Environment variable name for the request context encryption key.
///
/// When unset, the encrypted context header is omitted and downstream
/// handlers re-derive everything from the stamped auth headers. It becomes
/// mandatory once options are supplied per request, since those may carry
/// a secret key that must not travel in clear text.
pub const ENCRYPTION_KEY_ENV: &str = "AUTH_ENCRYPTION_KEY";

pub const SIGN_IN_URL_ENV: &str = "AUTH_SIGN_IN_URL";
pub const SIGN_UP_URL_ENV: &str = "AUTH_SIGN_UP_URL";
pub const DOMAIN_ENV: &str = "AUTH_DOMAIN";
pub const PROXY_URL_ENV: &str = "AUTH_PROXY_URL";
pub const IS_SATELLITE_ENV: &str = "AUTH_IS_SATELLITE";
pub const AUTHORIZED_PARTIES_ENV: &str = "AUTH_AUTHORIZED_PARTIES";
pub const DEBUG_ENV: &str = "AUTH_DEBUG";

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Parse a boolean flag the way operators tend to write them.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
