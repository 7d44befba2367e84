//! HTTP surface for the token grant endpoint.

use crate::error::GrantError;
use crate::service::{GrantOutcome, GrantService, IdTokenGrantParams};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rts_identity_oidc::OidcError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GrantService>,
}

/// Router exposing `POST /token?grant_type=id_token`.
pub fn router(service: Arc<GrantService>) -> Router {
    Router::new()
        .route("/token", post(token_grant))
        .with_state(AppState { service })
}

#[derive(Debug, Deserialize)]
struct TokenGrantQuery {
    #[serde(default)]
    grant_type: String,
}

async fn token_grant(
    State(state): State<AppState>,
    Query(query): Query<TokenGrantQuery>,
    Json(params): Json<IdTokenGrantParams>,
) -> Response {
    if query.grant_type != "id_token" {
        return ApiError::bad_request(
            "unsupported_grant_type",
            format!("Grant type {:?} is not supported here", query.grant_type),
        )
        .into_response();
    }

    match state.service.exchange(&params).await {
        Ok(GrantOutcome::Issued(pair)) => (StatusCode::OK, Json(pair)).into_response(),
        Ok(GrantOutcome::Suppressed) => {
            (StatusCode::OK, Json(serde_json::json!({}))).into_response()
        }
        Err(grant_error) => ApiError::from(grant_error).into_response(),
    }
}

/// Structured oauth-style error answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub description: String,
}

impl ApiError {
    fn bad_request(code: &'static str, description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            description: description.into(),
        }
    }

    fn server_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "server_error",
            description: "Internal Server Error".to_string(),
        }
    }
}

impl From<GrantError> for ApiError {
    fn from(grant_error: GrantError) -> Self {
        match &grant_error {
            GrantError::InvalidRequest(message) => {
                ApiError::bad_request("invalid_request", message.clone())
            }
            GrantError::Oidc(OidcError::Discovery(_))
            | GrantError::Store(_)
            | GrantError::Session(_) => {
                // Internal detail is for operators, never the response body.
                error!(error = %display_chain(&grant_error), "id_token grant failed");
                ApiError::server_error()
            }
            GrantError::Oidc(oidc) => match oidc {
                OidcError::BadIdToken(_)
                | OidcError::UnknownSigningKey { .. }
                | OidcError::UnsupportedAlgorithm { .. }
                | OidcError::AccessTokenHashMismatch => {
                    // One generic message for every cryptographic and claim
                    // failure so callers cannot probe which gate rejected them.
                    debug!(error = %display_chain(&grant_error), "Rejected id_token");
                    ApiError::bad_request("invalid_request", "Bad ID token")
                }
                OidcError::NonceMismatch => ApiError::bad_request("invalid_nonce", oidc.to_string()),
                _ => ApiError::bad_request("invalid_request", oidc.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(OAuthErrorBody {
                error: self.code.to_string(),
                error_description: self.description,
            }),
        )
            .into_response()
    }
}

fn display_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
