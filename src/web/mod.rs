//! HTTP transport
//!
//! Thin axum layer over [`IdentityBroker`]: route table, request/response
//! shapes, the bearer-token extractor, and the refresh cookie. All session
//! refresh state travels in an HttpOnly cookie; access tokens travel in the
//! `Authorization` header.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::broker::{CurrentUser, IdentityBroker};
use crate::config::AppConfig;
use crate::error::Error;
use crate::identity::ProfileView;
use crate::provider::ProviderKind;

/// Cookie carrying the opaque refresh secret
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    broker: Arc<IdentityBroker>,
    config: Arc<AppConfig>,
}

/// Build the application router
#[must_use]
pub fn router(broker: Arc<IdentityBroker>, config: Arc<AppConfig>) -> Router {
    let cors = cors_layer(&config);
    Router::new()
        .route("/api/v1/auth/login/{provider}", post(login_start))
        .route("/api/v1/auth/callback/{provider}", get(login_callback))
        .route("/api/v1/auth/refresh", post(refresh_session))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/user/profile", get(profile))
        .route("/api/v1/link/start/{provider}", post(link_start))
        .route("/api/v1/link/callback/{provider}", get(link_callback))
        .route("/api/v1/link/{provider}", delete(unlink))
        .route("/api/v1/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { broker, config })
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect::<Vec<_>>();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::InvalidState
            | Self::UnknownProvider(_)
            | Self::PolicyViolation(_)
            | Self::Provider(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Unauthorized("missing authorization header".to_string()))?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Unauthorized("malformed authorization header".to_string()))?;
        state.broker.authenticate(token).await
    }
}

fn parse_provider(raw: &str) -> Result<ProviderKind, Error> {
    raw.parse()
        .map_err(|_| Error::UnknownProvider(raw.to_string()))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: String,
    state: String,
}

#[derive(Debug, Serialize)]
struct AuthorizationUrlBody {
    authorization_url: String,
}

#[derive(Debug, Serialize)]
struct AccessTokenBody {
    access_token: String,
    token_type: &'static str,
}

fn refresh_cookie(config: &AppConfig, secret: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(REFRESH_COOKIE, secret);
    cookie.set_http_only(true);
    cookie.set_secure(config.is_production());
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::days(config.jwt.refresh_token_days));
    cookie
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::from(REFRESH_COOKIE);
    cookie.set_path("/");
    cookie
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn login_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<AuthorizationUrlBody>, Error> {
    let provider = parse_provider(&provider)?;
    let authorization_url = state.broker.begin_login(provider)?;
    Ok(Json(AuthorizationUrlBody { authorization_url }))
}

async fn login_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), Error> {
    let provider = parse_provider(&provider)?;
    let session = state
        .broker
        .complete_login(provider, &params.code, &params.state)
        .await?;

    let mut destination = Url::parse(&state.config.frontend_url)
        .map_err(|err| Error::Config(format!("invalid frontend URL: {err}")))?;
    destination
        .query_pairs_mut()
        .append_pair("access_token", &session.access_token);

    let jar = jar.add(refresh_cookie(&state.config, session.refresh_token));
    Ok((jar, Redirect::to(destination.as_str())))
}

async fn refresh_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AccessTokenBody>), Error> {
    let raw = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| Error::Unauthorized("missing refresh token".to_string()))?;

    let refreshed = state.broker.refresh_session(&raw).await?;
    let jar = match refreshed.refresh_token {
        Some(secret) => jar.add(refresh_cookie(&state.config, secret)),
        None => jar,
    };

    Ok((
        jar,
        Json(AccessTokenBody {
            access_token: refreshed.access_token,
            token_type: "bearer",
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), Error> {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        let raw = cookie.value().to_string();
        state.broker.logout(&raw).await?;
    }
    Ok((jar.remove(removal_cookie()), StatusCode::NO_CONTENT))
}

async fn profile(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ProfileView>, Error> {
    let view = state.broker.profile(user.account_id).await?;
    Ok(Json(view))
}

async fn link_start(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(provider): Path<String>,
) -> Result<Json<AuthorizationUrlBody>, Error> {
    let provider = parse_provider(&provider)?;
    let authorization_url = state.broker.begin_link(user.account_id, provider)?;
    Ok(Json(AuthorizationUrlBody { authorization_url }))
}

async fn link_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, Error> {
    let provider = parse_provider(&provider)?;
    let linked = state
        .broker
        .complete_link(provider, &params.code, &params.state)
        .await?;

    let destination = format!(
        "{}/profile?linked={}",
        state.config.frontend_url.trim_end_matches('/'),
        linked.provider
    );
    Ok(Redirect::to(&destination))
}

async fn unlink(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(provider): Path<String>,
) -> Result<StatusCode, Error> {
    let provider = parse_provider(&provider)?;
    let removed = state.broker.unlink(user.account_id, provider).await?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!(
            "no linked identity for provider {provider}"
        )))
    }
}
