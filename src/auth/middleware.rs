// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The auth gate middleware.
//!
//! ## Per-request sequence
//!
//! 1. Drop client-supplied gate headers and resolve options.
//! 2. Ignored routes pass straight through, tagged `ignored-route`.
//! 3. Authenticate (bearer token, cookies, handshake, machine verifier).
//! 4. A handshake redirect is returned as-is.
//! 5. The caller handler runs with a [`GateAuth`] bound to the state. It may
//!    answer itself, raise a [`ProtectSignal`], or let the request continue.
//! 6. Continuing requests get the stamped auth headers, the sealed context
//!    and a [`RequestScope`] extension.
//! 7. The response gets the pre-auth cookies, dev-browser continuity for
//!    gate-generated redirects, and the diagnostic headers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let gate = Arc::new(
//!     AuthGate::builder(AuthOptions::from_env()?, keys)
//!         .codec(RequestContextCodec::new(Some(&encryption_key))?)
//!         .handler(protect_routes)
//!         .build(),
//! );
//!
//! let app = Router::new()
//!     .route("/dashboard", get(dashboard))
//!     .layer(axum::middleware::from_fn_with_state(gate.clone(), auth_gate_middleware))
//!     .with_state(AppState::new(gate));
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::LOCATION, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::authenticator::{
    authenticate_machine, authenticate_request, diagnostic_headers, stamp_request_headers,
};
use super::headers::{strip_gate_headers, AUTH_REASON_HEADER, DEV_BROWSER, REDIRECT_TO_HEADER};
use super::jwks::KeyStore;
use super::protect::{GateAuth, ProtectContext, ProtectSignal};
use super::state::{AuthReason, AuthState};
use super::tokens::{MachineTokenVerifier, TokenType};
use crate::context::{PropagatedContext, RequestContextCodec, RequestScope, REQUEST_DATA_HEADER};
use crate::debug::DebugLog;
use crate::error::GateError;
use crate::matcher::RouteMatcher;
use crate::options::{AuthOptions, OptionsResolver, ResolvedOptions};
use crate::request::{RequestInfo, RequestKind, RequestSnapshot};
use crate::BoxFuture;

/// What a gate handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A protect signal; turned into its response by the gate.
    #[error("{0}")]
    Signal(ProtectSignal),

    /// Anything else; escapes the gate as [`GateError::Handler`].
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Failed(error.into())
    }
}

impl From<ProtectSignal> for HandlerError {
    fn from(signal: ProtectSignal) -> Self {
        HandlerError::Signal(signal)
    }
}

pub type HandlerResult = Result<Option<Response>, HandlerError>;

/// Caller logic run once per authenticated request.
///
/// `Ok(None)` lets the request continue to the router; `Ok(Some(_))`
/// answers it directly.
pub trait GateHandler: Send + Sync + 'static {
    fn call(&self, auth: GateAuth, request: RequestSnapshot) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> GateHandler for F
where
    F: Fn(GateAuth, RequestSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, auth: GateAuth, request: RequestSnapshot) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(auth, request))
    }
}

/// Shared, immutable gate configuration.
pub struct AuthGate {
    options: AuthOptions,
    resolver: OptionsResolver,
    keys: KeyStore,
    codec: RequestContextCodec,
    ignored: RouteMatcher,
    api_routes: RouteMatcher,
    machine_verifier: Option<Arc<dyn MachineTokenVerifier>>,
    handler: Option<Arc<dyn GateHandler>>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("options", &self.options)
            .field("resolver", &self.resolver)
            .field("keys", &self.keys)
            .field("codec", &self.codec)
            .field("machine_verifier", &self.machine_verifier.is_some())
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    pub fn builder(options: AuthOptions, keys: KeyStore) -> AuthGateBuilder {
        AuthGateBuilder {
            gate: AuthGate {
                options,
                resolver: OptionsResolver::Static,
                keys,
                codec: RequestContextCodec::default(),
                ignored: RouteMatcher::ignored_default(),
                api_routes: RouteMatcher::api_default(),
                machine_verifier: None,
                handler: None,
            },
        }
    }

    /// Static options, before any per-request override.
    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn codec(&self) -> &RequestContextCodec {
        &self.codec
    }

    pub fn is_api_route(&self, request: &RequestInfo<'_>) -> bool {
        self.api_routes.matches(request)
    }
}

pub struct AuthGateBuilder {
    gate: AuthGate,
}

impl AuthGateBuilder {
    pub fn resolver(mut self, resolver: OptionsResolver) -> Self {
        self.gate.resolver = resolver;
        self
    }

    pub fn codec(mut self, codec: RequestContextCodec) -> Self {
        self.gate.codec = codec;
        self
    }

    /// Routes the gate does not touch at all.
    pub fn ignored_routes(mut self, matcher: RouteMatcher) -> Self {
        self.gate.ignored = matcher;
        self
    }

    /// Routes always classified as API requests.
    pub fn api_routes(mut self, matcher: RouteMatcher) -> Self {
        self.gate.api_routes = matcher;
        self
    }

    pub fn machine_verifier(mut self, verifier: Arc<dyn MachineTokenVerifier>) -> Self {
        self.gate.machine_verifier = Some(verifier);
        self
    }

    pub fn handler<H: GateHandler>(mut self, handler: H) -> Self {
        self.gate.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> AuthGate {
        self.gate
    }
}

/// Gate middleware, installed with `axum::middleware::from_fn_with_state`.
pub async fn auth_gate_middleware(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    strip_gate_headers(request.headers_mut());

    let info = RequestInfo::from_request(&request);
    let ResolvedOptions { options, dynamic } = gate.resolver.resolve(&gate.options, &info).await?;

    let mut debug_log = DebugLog::new(options.debug);
    let request_url = info.public_url();
    debug_log.record("url", || json!(request_url.as_ref().map(Url::as_str)));
    debug_log.record("options", || options.redacted());
    debug_log.record("dynamic_options", || json!(dynamic));

    if gate.ignored.matches(&info) {
        debug!(path = %info.path(), "Ignored route");
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            HeaderName::from_static(AUTH_REASON_HEADER),
            HeaderValue::from_static("ignored-route"),
        );
        debug_log.record("auth", || json!({ "reason": AuthReason::IgnoredRoute.code() }));
        debug_log.commit();
        return Ok(response);
    }

    let kind = RequestKind::classify(info.headers(), gate.api_routes.matches(&info));
    let mut state = authenticate_request(&info, &options, &gate.keys);

    if let (Some(token), Some(verifier)) = (info.bearer_token(), gate.machine_verifier.as_deref()) {
        let token_type = TokenType::classify(token);
        if token_type.is_machine() {
            state.auth = authenticate_machine(token, token_type, verifier).await;
        }
    }

    let state = state
        .settle_for(kind, info.method())
        .for_accepted(&options.accepts_token);
    debug_log.record("auth", || state.auth.summary());

    if let AuthState::Handshake(handshake) = &state.auth {
        debug!(
            path = %info.path(),
            reason = %handshake.reason,
            "Starting handshake"
        );
        let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
        append_headers(response.headers_mut(), &handshake.headers);
        append_headers(response.headers_mut(), &state.response_headers);
        insert_headers(response.headers_mut(), &diagnostic_headers(&state.auth));
        debug_log.record_headers("response_headers", response.headers());
        debug_log.commit();
        return Ok(response);
    }

    let dynamic_secret = dynamic && options.secret_key != gate.options.secret_key;
    let mut context = PropagatedContext::from_options(&options, dynamic_secret);
    if let Some(signed_in) = state.auth.signed_in() {
        if let Some(identity) = signed_in.machine() {
            context = context.with_machine(signed_in.token.clone(), identity.clone());
        }
    }
    let sealed = gate.codec.encrypt(&context)?;

    let dev_browser = info
        .cookie(DEV_BROWSER)
        .map(str::to_string)
        .or_else(|| info.query_param(DEV_BROWSER));

    let outcome = match &gate.handler {
        Some(handler) => {
            let protect_context = ProtectContext {
                kind,
                return_url: request_url.as_ref().map(|u| u.to_string()),
                sign_in_url: options.sign_in_url(),
            };
            handler
                .call(GateAuth::new(state.auth.clone(), protect_context), info.snapshot())
                .await
        }
        None => Ok(None),
    };

    let mut response = match outcome {
        Ok(Some(response)) => response,
        Ok(None) => {
            stamp_request_headers(request.headers_mut(), &state.auth, &options);
            if let Some(value) = sealed.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                request.headers_mut().insert(REQUEST_DATA_HEADER, value);
            }
            request
                .extensions_mut()
                .insert(RequestScope::new(gate.codec.clone(), sealed));
            next.run(request).await
        }
        Err(HandlerError::Signal(signal)) => {
            debug!(signal = %signal, "Auth handler raised a protect signal");
            debug_log.record("signal", || json!(signal.to_string()));
            signal.into_response()
        }
        Err(HandlerError::Failed(error)) => return Err(GateError::Handler(error)),
    };

    append_headers(response.headers_mut(), &state.response_headers);
    if let Some(request_url) = &request_url {
        apply_dev_browser_continuity(
            &mut response,
            request_url,
            dev_browser.as_deref(),
            options.is_development(),
        );
    } else {
        response.headers_mut().remove(REDIRECT_TO_HEADER);
    }
    insert_headers(response.headers_mut(), &diagnostic_headers(&state.auth));

    debug_log.record_headers("response_headers", response.headers());
    debug_log.commit();
    Ok(response)
}

fn append_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        target.append(name.clone(), value.clone());
    }
}

fn insert_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}

/// Forward the dev-browser id on gate-generated cross-origin redirects.
///
/// Only development instances do this, and only for responses carrying the
/// redirect marker. The marker never leaves the gate.
fn apply_dev_browser_continuity(
    response: &mut Response,
    request_url: &Url,
    dev_browser: Option<&str>,
    development: bool,
) {
    let marked = response.headers_mut().remove(REDIRECT_TO_HEADER).is_some();
    if !marked || !development {
        return;
    }
    let Some(dev_browser) = dev_browser else {
        return;
    };
    let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };
    let Ok(mut target) = request_url.join(location) else {
        return;
    };
    if target.origin() == request_url.origin() {
        return;
    }

    let retained: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(key, _)| key != DEV_BROWSER)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    target
        .query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(DEV_BROWSER, dev_browser);

    if let Ok(value) = HeaderValue::from_str(target.as_str()) {
        response.headers_mut().insert(LOCATION, value);
    }
}
