//! Transport middleware and the bearer-token guard.
//!
//! [`apply_http_layers`] wraps a finished router with the transport
//! concerns every request shares: request ids, trace spans, CORS, and the
//! request timeout. [`require_auth`] is route-level and only guards the
//! profile/task endpoints.

use axum::extract::{Request, State};
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use writeback_core::ApiErrorBody;

use super::config::NetworkConfig;
use super::handlers::AppState;

/// Wraps `router` with the transport middleware.
///
/// `Router::layer` nests each new layer outside the previous ones, so the
/// layers below are listed innermost first. On the way in a request
/// therefore passes: request-id assignment, trace span, CORS, timeout,
/// and finally request-id propagation onto the response.
#[must_use]
pub fn apply_http_layers(router: Router, config: &NetworkConfig) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    router
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(cors_from_origins(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

/// CORS policy for the configured origin list. `"*"` anywhere in the list
/// means any origin; otherwise only origins that parse as header values
/// make the allowlist, and unparseable entries are dropped.
fn cors_from_origins(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let allowlist: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(allowlist))
}

/// Verified token subject, inserted into request extensions by
/// [`require_auth`] and extracted by the mutation handlers.
#[derive(Debug, Clone)]
pub struct AuthSubject(pub String);

/// The claims the server cares about. Anything else in the token is
/// ignored.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    /// Subject: the user id.
    pub sub: String,
    /// Expiry as a Unix timestamp; `jsonwebtoken` validates it.
    pub exp: u64,
}

/// Bearer-token middleware for the mutation and read endpoints.
///
/// Rejects missing or invalid tokens with 401; on success the subject id
/// is available to handlers as an [`AuthSubject`] extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    let key = DecodingKey::from_secret(state.jwt_secret.as_bytes());
    match decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256)) {
        Ok(data) => {
            request.extensions_mut().insert(AuthSubject(data.claims.sub));
            next.run(request).await
        }
        Err(err) => {
            debug!(error = %err, "rejected bearer token");
            unauthorized("invalid bearer token")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiErrorBody::new("UNAUTHORIZED", message)),
    )
        .into_response()
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &str, subject: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: subject.to_string(),
        exp: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0) + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode test token")
}
