//! CORS middleware
//!
//! The proxy answers with a single configured origin. Preflight requests are
//! answered here and never reach the proxy handler; upstream CORS headers
//! are stripped by the handler so these are the only ones the browser sees.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

const ALLOW_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type,Authorization,X-API-KEY,X-Target-URL";

/// CORS headers added to every response
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_origin: HeaderValue,
    allow_headers: HeaderValue,
}

impl CorsPolicy {
    /// `api_key_header` is advertised in preflight answers next to the defaults
    pub fn new(origin: &str, api_key_header: &str) -> Self {
        let allow_origin = HeaderValue::from_str(origin).unwrap_or_else(|_| {
            warn!(origin, "CORS: invalid origin, allowing any origin");
            HeaderValue::from_static("*")
        });

        let mut headers = ALLOW_HEADERS.to_string();
        if !ALLOW_HEADERS
            .split(',')
            .any(|h| h.eq_ignore_ascii_case(api_key_header))
        {
            headers.push(',');
            headers.push_str(api_key_header);
        }
        let allow_headers = HeaderValue::from_str(&headers)
            .unwrap_or_else(|_| HeaderValue::from_static(ALLOW_HEADERS));

        debug!(origin = ?allow_origin, "CORS policy configured");
        Self {
            allow_origin,
            allow_headers,
        }
    }

    fn apply(&self, headers: &mut HeaderMap, preflight: bool) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        if preflight {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOW_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                self.allow_headers.clone(),
            );
        }
    }
}

/// Answer preflights with 204 and stamp CORS headers on everything else
pub async fn cors(State(policy): State<CorsPolicy>, req: Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        policy.apply(response.headers_mut(), true);
        return response;
    }

    let mut response = next.run(req).await;
    policy.apply(response.headers_mut(), false);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::from_fn_with_state;
    use axum::routing::any;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(origin: &str) -> axum::Router {
        axum::Router::new()
            .route(
                "/",
                any(|| async {
                    (
                        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "https://upstream.example")],
                        "ok",
                    )
                }),
            )
            .layer(from_fn_with_state(CorsPolicy::new(origin, "x-api-key"), cors))
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let response = app("*")
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/")
                    .header("Origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], ALLOW_METHODS);
        assert_eq!(headers["access-control-allow-headers"], ALLOW_HEADERS);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_configured_origin_replaces_existing_header() {
        let response = app("https://app.example.com")
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let origins: Vec<_> = response
            .headers()
            .get_all("access-control-allow-origin")
            .iter()
            .collect();
        assert_eq!(origins, vec!["https://app.example.com"]);
        assert!(response
            .headers()
            .get("access-control-allow-methods")
            .is_none());
    }

    #[test]
    fn test_custom_key_header_is_advertised() {
        let policy = CorsPolicy::new("*", "x-client-key");
        assert_eq!(
            policy.allow_headers,
            "Content-Type,Authorization,X-API-KEY,X-Target-URL,x-client-key"
        );

        let policy = CorsPolicy::new("*", "x-api-key");
        assert_eq!(policy.allow_headers, ALLOW_HEADERS);
    }
}
