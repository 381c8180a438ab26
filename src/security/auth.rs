//! Authentication middleware.
//! Resolves the caller's authentication state and enforces it.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;

use crate::rpc::error::RpcError;
use crate::rpc::handler::Call;
use crate::rpc::middleware::{self, Middleware, Next};
use crate::security::secrets::SecretProvider;

/// Authentication state attached to every call's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Authenticated { subject: String },
    Anonymous,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }
}

/// Derives the authentication state of a request from its headers.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, headers: &HeaderMap) -> AuthState;
}

/// Treats every caller as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn authenticate(&self, _headers: &HeaderMap) -> AuthState {
        AuthState::Anonymous
    }
}

/// Accepts `Authorization: Bearer <token>` where the token equals the secret
/// stored under `secret_id`.
pub struct BearerAuthenticator<S> {
    secrets: S,
    secret_id: String,
}

impl<S: SecretProvider> BearerAuthenticator<S> {
    pub fn new(secrets: S, secret_id: impl Into<String>) -> Self {
        Self {
            secrets,
            secret_id: secret_id.into(),
        }
    }
}

impl<S: SecretProvider> Authenticator for BearerAuthenticator<S> {
    fn authenticate(&self, headers: &HeaderMap) -> AuthState {
        let Some(presented) = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        else {
            return AuthState::Anonymous;
        };

        let Some(expected) = self.secrets.get(&self.secret_id).filter(|s| !s.is_empty()) else {
            tracing::warn!(secret_id = %self.secret_id, "Bearer secret not configured");
            return AuthState::Anonymous;
        };

        if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            AuthState::Authenticated {
                subject: self.secret_id.clone(),
            }
        } else {
            AuthState::Anonymous
        }
    }
}

/// Attach the authentication state and reject anonymous callers with
/// `unauthorized`.
pub fn require_authenticated(authenticator: Arc<dyn Authenticator>) -> Middleware {
    middleware::from_fn(move |mut call: Call, next: Next| {
        let state = authenticator.authenticate(call.context.headers());
        let authenticated = state.is_authenticated();
        call.context.extensions_mut().insert(state);
        async move {
            if !authenticated {
                return Err(RpcError::unauthorized());
            }
            next.run(call).await
        }
    })
}

/// Attach the authentication state without enforcing it.
pub fn optional_authentication(authenticator: Arc<dyn Authenticator>) -> Middleware {
    middleware::from_fn(move |mut call: Call, next: Next| {
        let state = authenticator.authenticate(call.context.headers());
        call.context.extensions_mut().insert(state);
        next.run(call)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handler::{self, tests::call, RpcContext};
    use crate::security::secrets::StaticSecrets;
    use axum::http::HeaderValue;

    fn bearer() -> Arc<dyn Authenticator> {
        let secrets = StaticSecrets::new();
        secrets.insert("api_token", "s3cret");
        Arc::new(BearerAuthenticator::new(secrets, "api_token"))
    }

    fn with_auth(value: &'static str) -> Call {
        let mut c = call("");
        let mut headers = c.context.headers().clone();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        c.context = RpcContext::new(
            c.context.request_id().to_string(),
            c.context.method().clone(),
            c.context.requested_version().clone(),
            c.context.resolved_version().clone(),
            headers,
        );
        c
    }

    #[test]
    fn test_bearer_authenticator() {
        let auth = bearer();
        let mut headers = HeaderMap::new();
        assert_eq!(auth.authenticate(&headers), AuthState::Anonymous);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert_eq!(auth.authenticate(&headers), AuthState::Anonymous);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(auth.authenticate(&headers).is_authenticated());
    }

    #[test]
    fn test_bearer_rejects_prefix_and_extension() {
        let auth = bearer();
        for value in ["Bearer s3cre", "Bearer s3cretX", "Bearer S3CRET", "Bearer ", "s3cret"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(auth.authenticate(&headers), AuthState::Anonymous, "{value}");
        }

        // An empty configured secret never matches.
        let secrets = StaticSecrets::new();
        secrets.insert("api_token", "");
        let auth = BearerAuthenticator::new(secrets, "api_token");
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(auth.authenticate(&headers), AuthState::Anonymous);
    }

    #[test]
    fn test_missing_secret_is_anonymous() {
        let auth = BearerAuthenticator::new(StaticSecrets::new(), "api_token");
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(auth.authenticate(&headers), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn test_require_authenticated() {
        let whoami = handler::from_fn(|ctx: RpcContext| async move {
            match ctx.extensions().get::<AuthState>() {
                Some(AuthState::Authenticated { .. }) => Ok(()),
                _ => Err(RpcError::new("no_auth_state")),
            }
        });
        let chain = require_authenticated(bearer())(whoami);

        let err = chain(call("")).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(err.status_code().as_u16(), 401);

        assert!(chain(with_auth("Bearer s3cret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_optional_authentication_passes_anonymous() {
        let inner = handler::from_fn(|ctx: RpcContext| async move {
            match ctx.extensions().get::<AuthState>() {
                Some(AuthState::Anonymous) => Ok(()),
                other => Err(RpcError::new("unexpected_auth_state").with_meta("state", format!("{other:?}"))),
            }
        });
        let chain = optional_authentication(Arc::new(AnonymousAuthenticator))(inner);
        let reply = chain(call("")).await.unwrap();
        assert!(reply.body.is_none());
    }
}
