// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Edge authentication and authorization for requests entering the service.
//!
//! ## Auth Flow
//!
//! 1. The gate middleware authenticates every processed request:
//!    - `Authorization: Bearer <token>` (session JWT or machine token)
//!    - otherwise the `__session` / `__client_uat` cookies
//! 2. Cookie state that cannot be trusted locally triggers a handshake
//!    redirect to the frontend API, which answers with fresh cookies.
//! 3. The resolved [`AuthState`] is bound to a [`GateAuth`] for caller
//!    logic; failed [`Protect`] checks become redirects, 401/403 or 404.
//! 4. Downstream handlers read the stamped headers through the extractors
//!    without re-verifying the token.
//!
//! ## Security
//!
//! - Client-supplied copies of gate headers are stripped at the edge
//! - Stamped tokens are bound to the secret key with an HMAC signature
//! - Per-request options travel only inside the encrypted context header
//! - Session verification is networkless once keys are loaded

pub mod authenticator;
pub mod claims;
pub mod error;
pub mod extractor;
pub mod handshake;
pub mod headers;
pub mod jwks;
pub mod middleware;
pub mod protect;
pub mod roles;
pub mod state;
pub mod tokens;
pub mod verify;

pub use authenticator::{authenticate_request, get_auth, RequestState};
pub use claims::{Identity, SessionClaims, SignedIn};
pub use error::{AuthError, TokenVerificationError};
pub use extractor::{AdminOnly, Auth, OptionalAuth, RequireRole, RequiredRole};
pub use handshake::{HandshakeCoordinator, HandshakeState};
pub use jwks::{JwksManager, KeyStore};
pub use middleware::{auth_gate_middleware, AuthGate, GateHandler, HandlerError, HandlerResult};
pub use protect::{Decision, DenyReason, GateAuth, Protect, ProtectSignal, Requirement};
pub use roles::Has;
pub use state::{AuthReason, AuthState, AuthStatus};
pub use tokens::{AcceptsToken, MachineIdentity, MachineTokenVerifier, TokenType};
