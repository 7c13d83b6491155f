use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

use super::api::{error_response, ApiError};

/// Accepted API tokens for write requests
#[derive(Clone, Default)]
pub struct AuthState {
    tokens: Arc<BTreeSet<String>>,
}

impl AuthState {
    pub fn new(tokens: BTreeSet<String>) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }

    /// Compares against every configured token so timing does not reveal a match
    pub fn accepts(&self, token: &str) -> bool {
        self.tokens
            .iter()
            .fold(false, |matched, known| matched | constant_time_eq(known, token))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let len = a.len().max(b.len());
    let diff = (0..len).fold(a.len() ^ b.len(), |diff, i| {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff | usize::from(x ^ y)
    });
    diff == 0
}

/// Token from an `Authorization: Token <key>` or `Bearer <key>` header
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    if token.is_empty() {
        return None;
    }

    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        Some(token)
    } else {
        None
    }
}

fn is_read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Reads are public; every other method needs a configured API token
pub async fn require_api_token(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_read_only(request.method()) {
        return Ok(next.run(request).await);
    }

    let verdict = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(|token| auth.accepts(token));

    match verdict {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            warn!(method = %request.method(), path = %request.uri().path(), "Rejected invalid API token");
            Err(error_response(StatusCode::UNAUTHORIZED, "Invalid token", &[]))
        }
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Authentication credentials were not provided",
            &[],
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn ok_handler() -> &'static str {
        "ok"
    }

    fn app() -> Router {
        let auth = AuthState::new(BTreeSet::from(["secret".to_string()]));
        Router::new()
            .route("/api/menus", get(ok_handler).post(ok_handler))
            .route_layer(middleware::from_fn_with_state(auth, require_api_token))
    }

    fn request(method: Method, authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri("/api/menus");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Token abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Token "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn test_token_comparison() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret2"));
        assert!(!constant_time_eq("", "secret"));

        let auth = AuthState::new(BTreeSet::from(["alpha".to_string(), "beta".to_string()]));
        assert!(auth.accepts("alpha"));
        assert!(auth.accepts("beta"));
        assert!(!auth.accepts("alph"));
        assert!(!auth.accepts(""));
        assert!(!AuthState::default().accepts("alpha"));
    }

    #[tokio::test]
    async fn test_reads_are_public() {
        let response = app().oneshot(request(Method::GET, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_writes_require_token() {
        let response = app().oneshot(request(Method::POST, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(request(Method::POST, Some("Token wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(request(Method::POST, Some("Token secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app()
            .oneshot(request(Method::POST, Some("Bearer secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_token_set_rejects_writes() {
        let app = Router::new()
            .route("/api/menus", get(ok_handler).post(ok_handler))
            .route_layer(middleware::from_fn_with_state(
                AuthState::default(),
                require_api_token,
            ));

        let response = app
            .oneshot(request(Method::POST, Some("Token anything")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
