//! Resolves the bearer token into `Claims` via the configured
//! `AuthVerifier` (spec §4.3: authenticate happens here, never inside the
//! dispatcher). Missing/invalid tokens short-circuit with `UNAUTHORIZED`.

use crate::domain::auth::Claims;
use crate::errors::{render, BridgeError};
use crate::server::app::AppState;
use crate::server::middleware::request_id::RequestId;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub async fn auth_middleware(State(state): State<AppState>, mut request: Request<Body>, next: Next) -> Response {
    let request_id = request.extensions().get::<RequestId>().map(|r| r.0.clone()).unwrap_or_else(|| "unknown".to_string());

    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = bearer else {
        let (status, body) = render(&BridgeError::Unauthorized, &request_id);
        return (status, body).into_response();
    };

    match state.auth_verifier.verify(token).await {
        Some(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        None => {
            let (status, body) = render(&BridgeError::Unauthorized, &request_id);
            (status, body).into_response()
        }
    }
}
