//! Streamable HTTP transport with API-key authentication
//!
//! Every request must present the shared key in `X-API-Key`, as an
//! `Authorization: Bearer` token, or as an `api_key` query parameter.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;

use crate::server::RagsyncMcp;

pub const MCP_PATH: &str = "/mcp";

/// Router serving the MCP endpoint behind the API-key check
pub fn router(server: RagsyncMcp, api_key: String) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );
    require_api_key(Router::new().nest_service(MCP_PATH, service), api_key)
}

/// Wrap `router` so requests without the key are rejected with 401
pub fn require_api_key(router: Router, api_key: String) -> Router {
    router.layer(middleware::from_fn_with_state(Arc::new(api_key), check_api_key))
}

async fn check_api_key(
    State(expected): State<Arc<String>>,
    req: Request,
    next: Next,
) -> Response {
    match provided_key(req.headers(), req.uri()) {
        Some(key) if key == expected.as_str() => next.run(req).await,
        _ => {
            tracing::warn!(path = %req.uri().path(), "rejected unauthenticated request");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Key presented by the client; header first, then bearer token, then query
fn provided_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header("x-api-key")
        .or_else(|| {
            header(AUTHORIZATION.as_str())
                .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string))
                .filter(|v| !v.is_empty())
        })
        .or_else(|| {
            uri.query()?
                .split('&')
                .find_map(|pair| pair.strip_prefix("api_key="))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
}
