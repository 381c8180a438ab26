//! Methods every deployment exposes.
//!
//! - `ping@2019-01-01`: liveness, no input
//! - `server_info@2019-01-01`: package name and version
//! - `echo@preview`: returns its JSON object input unchanged

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::rpc::handler::{self, RpcContext, RpcRecord};
use crate::rpc::{RegistrationError, RouteDef, RpcResult, Service};

const FIRST_RELEASE: &str = "2019-01-01";

#[derive(Debug, Serialize)]
struct Pong {
    pong: bool,
}
impl RpcRecord for Pong {}

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
}
impl RpcRecord for ServerInfo {}

#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
struct Echo(Map<String, Value>);
impl RpcRecord for Echo {}

async fn ping(_ctx: RpcContext) -> RpcResult<Pong> {
    Ok(Pong { pong: true })
}

async fn server_info(_ctx: RpcContext) -> RpcResult<ServerInfo> {
    Ok(ServerInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn echo(ctx: RpcContext, input: Echo) -> RpcResult<Echo> {
    tracing::debug!(request_id = %ctx.request_id(), fields = input.0.len(), "Echoing input");
    Ok(input)
}

/// Register the built-in methods on `service`.
pub fn register_builtin(service: &mut Service) -> Result<(), RegistrationError> {
    service
        .register(RouteDef::new(FIRST_RELEASE, "ping", handler::from_fn_output(ping)))?
        .register(RouteDef::new(
            FIRST_RELEASE,
            "server_info",
            handler::from_fn_output(server_info),
        ))?
        .register(
            RouteDef::new("preview", "echo", handler::from_fn_input_output(echo))
                .schema(json!({ "type": "object" })),
        )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::middleware::{self, Next};
    use crate::rpc::Dispatcher;
    use axum::body::Bytes;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;

    fn dispatcher() -> Dispatcher {
        let mut svc = Service::new();
        svc.set_auth(middleware::from_fn(|call, next: Next| next.run(call)));
        register_builtin(&mut svc).unwrap();
        svc.into_dispatcher()
    }

    fn post(path: &str, body: &'static str) -> Request<Bytes> {
        Request::post(path).body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping_through_latest() {
        let response = dispatcher().dispatch(post("/latest/ping", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "pong": true }));
    }

    #[tokio::test]
    async fn test_server_info() {
        let response = dispatcher().dispatch(post("/2019-01-01/server_info", "")).await;
        let body = body_json(response).await;
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_echo_is_preview_only() {
        let d = dispatcher();
        let response = d.dispatch(post("/preview/echo", r#"{"a":1,"b":[true]}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "a": 1, "b": [true] }));

        let response = d.dispatch(post("/latest/echo", "{}")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_echo_rejects_non_objects() {
        let response = dispatcher().dispatch(post("/preview/echo", "[1,2]")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "bad_request");
    }
}
