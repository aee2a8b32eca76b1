// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware::from_fn_with_state,
    response::Html,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        auth_gate_middleware, Auth, GateAuth, GateHandler, HandlerError, HandlerResult, Protect,
    },
    error::ConfigError,
    matcher::RouteMatcher,
    request::RequestSnapshot,
    state::AppState,
    BoxFuture,
};

pub mod health;
pub mod users;

/// Gate handler protecting the demo routes.
///
/// `/v1/admin(.*)` needs the admin role; `/dashboard(.*)` and the other
/// `/v1` routes need any signed-in caller. `/v1/session` stays public.
pub struct RouteGuard {
    public: RouteMatcher,
    signed_in: RouteMatcher,
    admin: RouteMatcher,
}

impl RouteGuard {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            public: RouteMatcher::compile("/v1/session")?,
            signed_in: RouteMatcher::compile(["/dashboard(.*)", "/v1/(.*)"])?,
            admin: RouteMatcher::compile("/v1/admin(.*)")?,
        })
    }
}

impl GateHandler for RouteGuard {
    fn call(&self, auth: GateAuth, request: RequestSnapshot) -> BoxFuture<'static, HandlerResult> {
        let info = request.info();
        let result = if self.public.matches(&info) {
            Ok(())
        } else if self.admin.matches(&info) {
            auth.protect(&Protect::new().with_role("admin")).map(|_| ())
        } else if self.signed_in.matches(&info) {
            auth.protect(&Protect::new()).map(|_| ())
        } else {
            Ok(())
        };
        Box::pin(async move { result.map(|()| None).map_err(HandlerError::from) })
    }
}

async fn dashboard(Auth(user): Auth) -> Html<String> {
    Html(format!(
        "<h1>Dashboard</h1><p>Signed in as {}</p>",
        user.subject_id
    ))
}

pub fn router(state: AppState) -> Router {
    let gate = state.gate.clone();

    let v1_routes = Router::new()
        .route("/users/me", get(users::get_current_user))
        .route("/session", get(users::get_session_status))
        .route("/admin/me", get(users::get_admin));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/dashboard", get(dashboard))
        .nest("/v1", v1_routes)
        .with_state(state)
        .layer(from_fn_with_state(gate, auth_gate_middleware))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        users::get_current_user,
        users::get_session_status,
        users::get_admin
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            users::UserMeResponse,
            users::SessionStatusResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Users", description = "Identity of the authenticated caller")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::SessionClaims;
    use crate::auth::jwks::tests::static_store;
    use crate::auth::verify::tests::{claims_issued_at, now, sign_session};
    use crate::auth::AuthGate;
    use crate::options::tests::test_options;
    use axum::{
        body::{to_bytes, Body},
        http::{header::LOCATION, Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let gate = AuthGate::builder(test_options(), static_store())
            .handler(RouteGuard::new().unwrap())
            .build();
        router(AppState::new(Arc::new(gate)))
    }

    fn bearer(role: &str) -> String {
        let claims = SessionClaims {
            org_role: Some(role.to_string()),
            ..claims_issued_at(now())
        };
        format!("Bearer {}", sign_session(&claims))
    }

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::get(uri).header("host", "app.example.com");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let _ = app().into_make_service();
    }

    #[tokio::test]
    async fn users_me_returns_bearer_identity() {
        let auth = bearer("org:member");
        let response = app()
            .oneshot(request("/v1/users/me", &[("authorization", auth.as_str())]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user_id"], "user_123");
        assert_eq!(body["token_type"], "session_token");
    }

    #[tokio::test]
    async fn dashboard_redirects_signed_out_visitors() {
        let response = app().oneshot(request("/dashboard", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.example.com/sign-in?redirect_url="));
    }

    #[tokio::test]
    async fn session_status_is_public() {
        let response = app().oneshot(request("/v1/session", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["signed_in"], false);
    }

    #[tokio::test]
    async fn admin_route_needs_admin_role() {
        let member = bearer("org:member");
        let response = app()
            .oneshot(request(
                "/v1/admin/me",
                &[("authorization", member.as_str()), ("accept", "application/json")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["reason"], "missing-role");

        let admin = bearer("org:admin");
        let response = app()
            .oneshot(request(
                "/v1/admin/me",
                &[("authorization", admin.as_str()), ("accept", "application/json")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_served_through_the_gate() {
        let response = app().oneshot(request("/health/live", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-auth-status"], "signed-out");
    }
}
