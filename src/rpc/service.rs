//! Registration phase: the builder that owns the registry and middleware.
//!
//! # Lifecycle
//! ```text
//! Service::new()
//!     → use_middleware(..)*        (global list, call order)
//!     → set_auth(..)               (exactly one, before any route)
//!     → register(RouteDef)*        (validated, resolved after each call)
//!     → into_dispatcher()          (global + auth applied, frozen)
//! ```
//! Registration needs `&mut Service`, so it can only happen on one thread.

use std::sync::Arc;

use serde_json::Value;

use crate::rpc::dispatch::Dispatcher;
use crate::rpc::handler::Handler;
use crate::rpc::middleware::{self, Middleware};
use crate::rpc::registry::{RegistrationError, Registry};
use crate::rpc::schema::{validation_middleware, SchemaValidator};
use crate::rpc::version::{MethodName, Version};

/// One registration call: a handler (or a withdrawal) for a method at a
/// version, with optional request schema and route middleware.
pub struct RouteDef {
    version: String,
    method: String,
    handler: Option<Handler>,
    schema: Option<Value>,
    middleware: Vec<Middleware>,
}

impl RouteDef {
    pub fn new(version: impl Into<String>, method: impl Into<String>, handler: Handler) -> Self {
        Self {
            version: version.into(),
            method: method.into(),
            handler: Some(handler),
            schema: None,
            middleware: Vec::new(),
        }
    }

    /// Withdraw `method` from `version` onwards.
    pub fn withdraw(version: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            method: method.into(),
            handler: None,
            schema: None,
            middleware: Vec::new(),
        }
    }

    /// Validate request bodies against a JSON schema before the handler runs.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Append route-specific middleware; the first appended runs first.
    pub fn layer(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// Registration-phase owner of the registry.
#[derive(Default)]
pub struct Service {
    registry: Registry,
    global: Vec<Middleware>,
    auth: Option<Middleware>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append global middleware. Runs before authentication on every route.
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.global.push(middleware);
        self
    }

    /// Configure the mandatory authentication middleware.
    pub fn set_auth(&mut self, middleware: Middleware) -> &mut Self {
        if self.auth.replace(middleware).is_some() {
            tracing::warn!("Authentication middleware replaced");
        }
        self
    }

    /// Register a route. Every failure is a configuration error.
    pub fn register(&mut self, def: RouteDef) -> Result<&mut Self, RegistrationError> {
        let method = MethodName::parse(&def.method)?;
        let version = Version::parse(&def.version)?;

        if self.auth.is_none() {
            return Err(RegistrationError::AuthNotConfigured { method, version });
        }

        let handler = match def.handler {
            Some(handler) => {
                let validation = match &def.schema {
                    Some(schema) => match SchemaValidator::new(schema) {
                        Ok(validator) => Some(validation_middleware(Arc::new(validator))),
                        Err(source) => {
                            return Err(RegistrationError::Schema {
                                method,
                                version,
                                source,
                            })
                        }
                    },
                    None => None,
                };
                let layers: Vec<Middleware> = validation
                    .into_iter()
                    .chain(def.middleware)
                    .collect();
                Some(middleware::wrap(handler, &layers))
            }
            None => None,
        };

        let withdrawn = handler.is_none();
        self.registry
            .insert(version.clone(), method.clone(), handler)?;

        tracing::debug!(%method, %version, withdrawn, "Registered RPC method");
        Ok(self)
    }

    /// Read access to the registry while still registering.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Apply global and authentication middleware and freeze for serving.
    pub fn into_dispatcher(self) -> Dispatcher {
        let Service {
            mut registry,
            global,
            auth,
        } = self;

        let mut outer = global;
        outer.extend(auth);
        if !outer.is_empty() {
            registry.map_handlers(|handler| middleware::wrap(handler, &outer));
        }

        tracing::info!(
            versions = registry.versions().count(),
            latest = registry.latest().map(|v| v.as_str()).unwrap_or("none"),
            "RPC registry frozen"
        );
        Dispatcher::new(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::{codes, RpcError};
    use crate::rpc::handler::{self, Call};
    use axum::body::Bytes;
    use serde_json::json;

    fn noop() -> Handler {
        handler::from_fn(|_ctx| async { Ok(()) })
    }

    fn pass_through() -> Middleware {
        middleware::from_fn(|call, next: middleware::Next| next.run(call))
    }

    fn service() -> Service {
        let mut svc = Service::new();
        svc.set_auth(pass_through());
        svc
    }

    #[test]
    fn test_auth_required_before_routes() {
        let mut svc = Service::new();
        let err = svc
            .register(RouteDef::new("2019-01-01", "foo", noop()))
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::AuthNotConfigured { .. }));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut svc = service();
        for (version, method) in [("2019-01-01", "Foo"), ("2019-1-1", "foo"), ("", "foo")] {
            let err = svc.register(RouteDef::new(version, method, noop())).err().unwrap();
            assert!(matches!(err, RegistrationError::Parse(_)), "{version}/{method}");
        }
    }

    #[test]
    fn test_duplicate_fails_fast() {
        let mut svc = service();
        svc.register(RouteDef::new("2019-01-01", "foo", noop())).unwrap();
        let err = svc
            .register(RouteDef::new("2019-01-01", "foo", noop()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let mut svc = service();
        let def = RouteDef::new("2019-01-01", "foo", noop()).schema(json!({ "type": 12 }));
        let err = svc.register(def).err().unwrap();
        assert!(matches!(err, RegistrationError::Schema { .. }));
        assert_eq!(svc.registry().versions().count(), 0);
    }

    #[test]
    fn test_withdraw_preview_rejected() {
        let mut svc = service();
        let err = svc.register(RouteDef::withdraw("preview", "foo")).err().unwrap();
        assert!(matches!(err, RegistrationError::PreviewTombstone(_)));
    }

    #[tokio::test]
    async fn test_schema_runs_before_route_layers() {
        use std::sync::Mutex;

        let trail: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let seen = trail.clone();
        // Records on the way in, then swaps in a body the schema would reject.
        let rewrite = middleware::from_fn(move |mut call: Call, next: middleware::Next| {
            seen.lock().unwrap().push("route");
            call.body = Bytes::from_static(br#"{"name":5}"#);
            next.run(call)
        });
        #[derive(serde::Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: Value,
        }
        impl handler::RpcRecord for Named {}

        let reached = trail.clone();
        let greet = handler::from_fn_input(move |_ctx, _input: Named| {
            reached.lock().unwrap().push("handler");
            async { Ok(()) }
        });

        let mut svc = service();
        svc.register(
            RouteDef::new("2019-01-01", "greet", greet)
                .schema(json!({
                    "type": "object",
                    "properties": { "name": { "type": "string" } },
                    "required": ["name"]
                }))
                .layer(rewrite),
        )
        .unwrap();
        let dispatcher = svc.into_dispatcher();
        let table = dispatcher.registry().resolve(&Version::Latest).unwrap().clone();
        let route = table.get(&MethodName::parse("greet").unwrap()).unwrap();

        let err = (route.handler())(handler::tests::call("{}")).await.unwrap_err();
        assert_eq!(err.code(), codes::BAD_REQUEST);
        assert_eq!(err.reasons().len(), 1);
        assert!(trail.lock().unwrap().is_empty());

        // A valid body passes the schema; the route layer's rewrite is not re-validated.
        (route.handler())(handler::tests::call(r#"{"name":"ada"}"#))
            .await
            .unwrap();
        assert_eq!(*trail.lock().unwrap(), ["route", "handler"]);
    }

    #[tokio::test]
    async fn test_frozen_dispatcher_applies_auth() {
        let mut svc = Service::new();
        svc.set_auth(middleware::from_fn(|_call, _next| async {
            Err(RpcError::new(codes::UNAUTHORIZED))
        }));
        svc.register(RouteDef::new("2019-01-01", "foo", noop())).unwrap();
        let dispatcher = svc.into_dispatcher();

        let table = dispatcher
            .registry()
            .resolve(&Version::Latest)
            .unwrap()
            .clone();
        let route = table.get(&MethodName::parse("foo").unwrap()).unwrap();
        let err = (route.handler())(handler::tests::call("")).await.unwrap_err();
        assert_eq!(err.code(), codes::UNAUTHORIZED);
    }
}
