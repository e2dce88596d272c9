//! Middleware wrapped around every unary call.
//!
//! # Order
//! ```text
//! request  → RequestId → RequestLog → ResponseLog → Validate → Dispatch
//! response ←     "     ←     "      ←      "      ←    "     ←    "
//! ```
//!
//! Validation is innermost so rejected calls still get an identifier and
//! are logged. Each stage is a plain [`tower::Layer`]; [`intercept`] is the
//! default composition and any stage can be swapped by building the stack
//! by hand.

pub mod logging;
pub mod request_id;
pub mod validate;

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::{Service, ServiceBuilder};

use crate::observability::LineWriter;
use crate::rpc::status::Status;
use crate::rpc::types::{MethodTable, RpcRequest, RpcResponse, RpcService};

pub use logging::{RequestLog, RequestLogLayer, ResponseLog, ResponseLogLayer};
pub use request_id::{RequestId, RequestIdLayer, REQUEST_ID_HEADER};
pub use validate::{Validate, ValidateLayer};

/// Future returned by every stage.
pub type RpcFuture = BoxFuture<'static, Result<RpcResponse, Status>>;

/// The default interceptor stack around `inner`.
pub type Intercepted<S> = RequestId<RequestLog<ResponseLog<Validate<S>>>>;

/// Where request/response lines are written.
#[derive(Debug, Clone)]
pub struct RpcLogs {
    pub out: LineWriter,
    pub err: LineWriter,
}

impl Default for RpcLogs {
    fn default() -> Self {
        Self {
            out: LineWriter::info("rpc"),
            err: LineWriter::error("rpc"),
        }
    }
}

/// Wrap `inner` in the standard stages.
pub fn intercept<S>(inner: S, logs: &RpcLogs, methods: Arc<MethodTable>) -> Intercepted<S>
where
    S: Service<RpcRequest, Response = RpcResponse, Error = Status>,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(RequestIdLayer)
        .layer(RequestLogLayer::new(logs.out.clone()))
        .layer(ResponseLogLayer::new(logs.out.clone(), logs.err.clone()))
        .layer(ValidateLayer::new(methods))
        .service(inner)
}

/// Terminal stage: hands the call to an [`RpcService`].
pub struct Dispatch<T: ?Sized> {
    service: Arc<T>,
}

impl<T: ?Sized> Dispatch<T> {
    pub fn new(service: Arc<T>) -> Self {
        Self { service }
    }
}

impl<T: ?Sized> Clone for Dispatch<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<T: RpcService + ?Sized> Service<RpcRequest> for Dispatch<T> {
    type Response = RpcResponse;
    type Error = Status;
    type Future = RpcFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RpcRequest) -> Self::Future {
        let service = self.service.clone();
        Box::pin(async move { service.call(req).await })
    }
}
