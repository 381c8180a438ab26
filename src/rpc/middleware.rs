//! Middleware composition.
//!
//! # Execution order
//! ```text
//! G[0] → … → G[n-1] → auth → schema validation (if any) → R[0] → … → R[m-1] → handler
//! ```
//! `G` is the global list in "use" order, `R` the route list in registration
//! order. The first element of every list is the outermost wrapper.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::rpc::error::RpcResult;
use crate::rpc::handler::{Call, Handler, Reply};

/// A `handler -> handler` wrapper.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// The remainder of the chain, handed to middleware built with [`from_fn`].
#[derive(Clone)]
pub struct Next {
    inner: Handler,
}

impl Next {
    /// Invoke the rest of the chain.
    pub fn run(self, call: Call) -> BoxFuture<'static, RpcResult<Reply>> {
        (self.inner)(call)
    }
}

/// Build a middleware from an async function of `(call, next)`.
///
/// Returning without calling `next.run` short-circuits the chain.
pub fn from_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Call, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Reply>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |inner: Handler| {
        let f = f.clone();
        let handler: Handler = Arc::new(move |call: Call| {
            let next = Next {
                inner: inner.clone(),
            };
            f(call, next).boxed()
        });
        handler
    })
}

/// Wrap `handler` so that `layers[0]` runs first.
pub fn wrap(handler: Handler, layers: &[Middleware]) -> Handler {
    layers.iter().rev().fold(handler, |inner, layer| layer(inner))
}
