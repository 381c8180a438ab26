//! Request schema validation.
//!
//! Schemas are compiled once at registration; the middleware validates the
//! buffered body and reports every violation, not just the first.

use std::sync::Arc;

use axum::body::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::rpc::error::{codes, RpcError, RpcResult};
use crate::rpc::handler::Call;
use crate::rpc::middleware::{self, Middleware, Next};

/// The schema document itself could not be compiled.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SchemaError {
    message: String,
}

/// A precompiled JSON schema.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(schema)
            .map_err(|e| SchemaError {
                message: e.to_string(),
            })?;
        Ok(Self { validator })
    }

    /// Validate a decoded document. The error carries one
    /// `schema_violation` reason per violation.
    pub fn validate(&self, instance: &Value) -> RpcResult<()> {
        let violations: Vec<RpcError> = self
            .validator
            .iter_errors(instance)
            .map(|error| {
                let path = error.instance_path().to_string();
                let field = if path.is_empty() {
                    "$".to_string()
                } else {
                    format!("${path}")
                };
                let schema_path = error.schema_path().to_string();
                let keyword = schema_path.rsplit('/').next().unwrap_or_default().to_string();
                RpcError::new(codes::SCHEMA_VIOLATION)
                    .with_meta("field", field)
                    .with_meta("type", keyword)
                    .with_meta("description", error.to_string())
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(RpcError::bad_request().with_reasons(violations))
        }
    }

    /// Validate a raw request body. Empty and blank bodies are left to the
    /// handler adapter, which knows whether one is required.
    pub fn validate_body(&self, body: &Bytes) -> RpcResult<()> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let instance: Value = serde_json::from_slice(body).map_err(|e| {
            if e.is_eof() {
                return RpcError::internal(e);
            }
            RpcError::bad_request().with_reason(
                RpcError::new(codes::INVALID_REQUEST_BODY).with_meta("description", e.to_string()),
            )
        })?;
        self.validate(&instance)
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

/// Middleware rejecting bodies that do not satisfy `validator`.
///
/// The body is buffered in the [`Call`], so the handler still reads it in
/// full after validation.
pub fn validation_middleware(validator: Arc<SchemaValidator>) -> Middleware {
    middleware::from_fn(move |call: Call, next: Next| {
        let checked = validator.validate_body(&call.body);
        async move {
            checked?;
            next.run(call).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::normalize;
    use crate::rpc::handler::{self, tests::call, RpcContext, RpcRecord};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    fn person_schema() -> SchemaValidator {
        SchemaValidator::new(&json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer", "minimum": 0 }
            },
            "required": ["name"]
        }))
        .unwrap()
    }

    #[test]
    fn test_reports_every_violation() {
        let err = person_schema().validate(&json!({ "age": -1 })).unwrap_err();
        assert_eq!(err.code(), codes::BAD_REQUEST);
        assert_eq!(err.reasons().len(), 2);

        let mut kinds: Vec<_> = err
            .reasons()
            .iter()
            .map(|r| r.meta()["type"].as_str().unwrap().to_string())
            .collect();
        kinds.sort();
        assert_eq!(kinds, ["minimum", "required"]);

        let minimum = err
            .reasons()
            .iter()
            .find(|r| r.meta()["type"] == "minimum")
            .unwrap();
        assert_eq!(minimum.code(), codes::SCHEMA_VIOLATION);
        assert_eq!(minimum.meta()["field"], "$/age");
        assert!(minimum.meta()["description"].as_str().is_some());
    }

    #[test]
    fn test_valid_document() {
        assert!(person_schema()
            .validate(&json!({ "name": "ada", "age": 36 }))
            .is_ok());
    }

    #[test]
    fn test_invalid_json_body() {
        let err = person_schema()
            .validate_body(&Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert!(err.has_code(codes::INVALID_REQUEST_BODY));
        assert!(person_schema().validate_body(&Bytes::new()).is_ok());
    }

    #[test]
    fn test_truncated_body_is_unexpected_eof() {
        let err = person_schema()
            .validate_body(&Bytes::from_static(br#"{"name":"x"#))
            .unwrap_err();
        assert_eq!(normalize(err).code(), codes::UNEXPECTED_EOF);
    }

    #[test]
    fn test_invalid_schema() {
        assert!(SchemaValidator::new(&json!({ "type": 12 })).is_err());
    }

    #[derive(Deserialize)]
    struct Person {
        name: String,
    }
    impl RpcRecord for Person {}

    #[derive(Serialize)]
    struct Greeting {
        message: String,
    }
    impl RpcRecord for Greeting {}

    #[tokio::test]
    async fn test_handler_reads_body_after_validation() {
        let greet = handler::from_fn_input_output(|_ctx: RpcContext, p: Person| async move {
            Ok(Greeting {
                message: format!("hi {}", p.name),
            })
        });
        let chain = validation_middleware(Arc::new(person_schema()))(greet);

        let reply = chain(call(r#"{"name":"ada"}"#)).await.unwrap();
        assert_eq!(reply.body.unwrap(), Bytes::from_static(br#"{"message":"hi ada"}"#));

        let err = chain(call(r#"{"name":7}"#)).await.unwrap_err();
        assert_eq!(err.reasons()[0].meta()["type"], "type");
        assert_eq!(err.reasons()[0].meta()["field"], "$/name");
    }
}
