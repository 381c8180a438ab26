//! Request router and dispatcher.
//!
//! # Responsibilities
//! - Accept only `POST` with no query string
//! - Parse `/<version>/<method>` and resolve the route
//! - Report the resolution outcome in `Infra-Endpoint-Status`
//! - Invoke the route and turn its outcome into an HTTP response
//!
//! # Design Decisions
//! - Read-only after construction; clones share one `Arc<Registry>`
//! - Every failure leaves as a taxonomy-shaped JSON body; internal details
//!   go to the log only

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::http::request::request_id;
use crate::rpc::error::{codes, normalize, ErrorClass, RpcError, RpcResult};
use crate::rpc::handler::{Call, Reply, RpcContext};
use crate::rpc::registry::{Registry, ResolvedTable, Route};
use crate::rpc::version::{MethodName, Version};

/// Response header describing how the requested version was resolved.
pub const ENDPOINT_STATUS: HeaderName = HeaderName::from_static("infra-endpoint-status");

const PREVIEW_STATUS: &str = r#"preview; msg="experimental endpoint, may change or disappear without notice""#;
const LATEST_MSG: &str = "resolved to the most recent release, pin a dated version for stability";
const STABLE_STATUS: &str = "stable";

/// Outcome of a successful route lookup.
#[derive(Debug, Clone)]
pub struct Target {
    pub requested: Version,
    pub table: Arc<ResolvedTable>,
    pub route: Arc<Route>,
}

/// Serve-time front of the frozen registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve a request path of the form `/<version>/<method>`.
    pub fn lookup(&self, path: &str) -> RpcResult<Target> {
        let (version, method) = parse_path(path).ok_or_else(|| {
            RpcError::new(codes::ROUTE_NOT_FOUND).with_meta("path", path)
        })?;

        let table = self.registry.resolve(&version).ok_or_else(|| {
            RpcError::not_found().with_meta("version", version.as_str())
        })?;

        let route = table.get(&method).ok_or_else(|| {
            RpcError::not_found()
                .with_meta("version", version.as_str())
                .with_meta("method", method.as_str())
        })?;

        Ok(Target {
            requested: version,
            table: table.clone(),
            route: route.clone(),
        })
    }

    /// Dispatch a request whose body has already been buffered.
    pub async fn dispatch(&self, request: Request<Bytes>) -> Response {
        let (parts, body) = request.into_parts();

        if parts.method != Method::POST {
            let mut response = error_response(
                RpcError::new(codes::METHOD_NOT_ALLOWED).with_meta("verb", parts.method.as_str()),
            );
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        if parts.uri.query().is_some() {
            return error_response(
                RpcError::new(codes::UNEXPECTED_INPUT)
                    .with_meta("description", "request data must travel in the body"),
            );
        }

        let target = match self.lookup(parts.uri.path()) {
            Ok(target) => target,
            Err(err) => return error_response(err),
        };
        let status = endpoint_status(&target);

        let request_id = request_id(&parts.headers)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let context = RpcContext::new(
            request_id,
            target.route.method().clone(),
            target.requested.clone(),
            target.table.version().clone(),
            parts.headers,
        );

        let mut response = match (target.route.handler())(Call { context, body }).await {
            Ok(reply) => reply_response(reply),
            Err(err) => error_response(err),
        };
        response.headers_mut().insert(ENDPOINT_STATUS, status);
        response
    }
}

fn parse_path(path: &str) -> Option<(Version, MethodName)> {
    let (version, method) = path.strip_prefix('/')?.split_once('/')?;
    let version = Version::parse(version).ok()?;
    let method = MethodName::parse(method).ok()?;
    Some((version, method))
}

fn endpoint_status(target: &Target) -> HeaderValue {
    match &target.requested {
        Version::Preview => HeaderValue::from_static(PREVIEW_STATUS),
        Version::Latest => {
            let value = format!(
                r#"latest; v="{}"; msg="{}""#,
                target.table.version(),
                LATEST_MSG
            );
            HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("latest"))
        }
        Version::Dated(_) => HeaderValue::from_static(STABLE_STATUS),
    }
}

fn reply_response(reply: Reply) -> Response {
    let Reply { headers, body } = reply;
    let mut response = Response::new(body.map(Body::from).unwrap_or_else(Body::empty));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().extend(headers);
    response
}

/// Coerce any error into the wire shape. Internal causes are logged here
/// and never leave the process.
pub fn error_response(err: RpcError) -> Response {
    let err = normalize(err);
    if err.class() == ErrorClass::Internal {
        tracing::error!(error = %err, "RPC call failed with an internal error");
    }
    err.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handler::{self, RpcRecord};
    use crate::rpc::middleware;
    use crate::rpc::service::{RouteDef, Service};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Served {
        by: String,
        resolved: String,
    }
    impl RpcRecord for Served {}

    fn tagged(tag: &'static str) -> handler::Handler {
        handler::from_fn_output(move |ctx: RpcContext| async move {
            Ok(Served {
                by: tag.to_string(),
                resolved: ctx.resolved_version().to_string(),
            })
        })
    }

    fn dispatcher() -> Dispatcher {
        let mut svc = Service::new();
        svc.set_auth(middleware::from_fn(|call, next: middleware::Next| next.run(call)));
        svc.register(RouteDef::new("2019-01-01", "foo", tagged("foo-v1"))).unwrap();
        svc.register(RouteDef::new("2019-02-02", "bar", tagged("bar-v1"))).unwrap();
        svc.register(RouteDef::new("preview", "labs", tagged("labs"))).unwrap();
        svc.register(RouteDef::new("2019-01-01", "ping", handler::from_fn(|_ctx| async { Ok(()) })))
            .unwrap();
        svc.into_dispatcher()
    }

    fn post(path: &str, body: &'static str) -> Request<Bytes> {
        Request::post(path)
            .header("x-request-id", "test-req")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_path() {
        assert!(parse_path("/2019-01-01/foo").is_some());
        assert!(parse_path("/latest/get_user").is_some());
        assert!(parse_path("/preview/foo").is_some());
        for bad in ["", "/", "/foo", "/2019-01-01", "/2019-01-01/", "/2019-01-01/foo/bar", "2019-01-01/foo", "/v1/foo", "/latest/Foo"] {
            assert!(parse_path(bad).is_none(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_latest_header_names_resolved_version() {
        let response = dispatcher().dispatch(post("/latest/foo", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status = response.headers().get(&ENDPOINT_STATUS).unwrap().to_str().unwrap();
        assert!(status.starts_with(r#"latest; v="2019-02-02"; msg=""#), "{status}");

        let body = body_json(response).await;
        assert_eq!(body["by"], "foo-v1");
        assert_eq!(body["resolved"], "2019-02-02");
    }

    #[tokio::test]
    async fn test_stable_and_preview_headers() {
        let d = dispatcher();
        let response = d.dispatch(post("/2019-01-01/foo", "")).await;
        assert_eq!(response.headers()[&ENDPOINT_STATUS], "stable");

        let response = d.dispatch(post("/preview/labs", "")).await;
        let status = response.headers()[&ENDPOINT_STATUS].to_str().unwrap();
        assert!(status.starts_with("preview; msg="));
    }

    #[tokio::test]
    async fn test_unknown_version_and_method() {
        let d = dispatcher();
        let response = d.dispatch(post("/2018-01-01/foo", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["code"], "not_found");
        assert_eq!(body["meta"]["version"], "2018-01-01");

        let response = d.dispatch(post("/2019-01-01/bar", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["meta"]["method"], "bar");

        // Preview methods do not leak into dated versions and vice versa.
        let response = d.dispatch(post("/latest/labs", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = d.dispatch(post("/preview/foo", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_path() {
        let response = dispatcher().dispatch(post("/not/a/route", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(&ENDPOINT_STATUS).is_none());
        assert_eq!(body_json(response).await["code"], "route_not_found");
    }

    #[tokio::test]
    async fn test_verb_and_query_rejected() {
        let d = dispatcher();
        let get = Request::get("/latest/foo").body(Bytes::new()).unwrap();
        let response = d.dispatch(get).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");

        let response = d.dispatch(post("/latest/foo?x=1", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "unexpected_input");
    }

    #[tokio::test]
    async fn test_unexpected_body_on_no_input_method() {
        let response = dispatcher().dispatch(post("/2019-01-01/ping", "{}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[&ENDPOINT_STATUS], "stable");
        let body = body_json(response).await;
        assert_eq!(body["code"], "bad_request");
        assert_eq!(body["reasons"][0]["code"], "unexpected_request_body");
    }

    #[tokio::test]
    async fn test_empty_success_has_no_body() {
        let response = dispatcher().dispatch(post("/latest/ping", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_internal_error_is_coerced() {
        let mut svc = Service::new();
        svc.set_auth(middleware::from_fn(|call, next: middleware::Next| next.run(call)));
        svc.register(RouteDef::new(
            "2019-01-01",
            "explode",
            handler::from_fn(|_ctx| async {
                Err(RpcError::internal(std::io::Error::other("secret stack details")))
            }),
        ))
        .unwrap();

        let response = svc.into_dispatcher().dispatch(post("/latest/explode", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "unknown");
        assert!(!body.to_string().contains("secret stack details"));
    }
}
