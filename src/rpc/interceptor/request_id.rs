//! Request identifier assignment.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use uuid::Uuid;

use super::RpcFuture;
use crate::rpc::status::Status;
use crate::rpc::types::{RpcRequest, RpcResponse};

/// Metadata key carrying the request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensures every call carries a request identifier.
///
/// An identifier supplied by the client is kept; otherwise a UUIDv4 is
/// generated. The identifier is copied onto the response or error.
#[derive(Debug, Clone, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestId<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestId { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestId<S> {
    inner: S,
}

impl<S> Service<RpcRequest> for RequestId<S>
where
    S: Service<RpcRequest, Response = RpcResponse, Error = Status>,
    S::Future: Send + 'static,
{
    type Response = RpcResponse;
    type Error = Status;
    type Future = RpcFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: RpcRequest) -> Self::Future {
        let id = req
            .request_id
            .take()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| header_id(&req))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        req.request_id = Some(id.clone());

        let fut = self.inner.call(req);
        Box::pin(async move {
            match fut.await {
                Ok(mut resp) => {
                    resp.request_id = Some(id);
                    Ok(resp)
                }
                Err(status) => Err(status.with_request_id(id)),
            }
        })
    }
}

fn header_id(req: &RpcRequest) -> Option<String> {
    req.metadata
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tower::{service_fn, ServiceExt};

    fn echo(req: RpcRequest) -> std::future::Ready<Result<RpcResponse, Status>> {
        std::future::ready(Ok(RpcResponse::new(json!({ "seen": req.request_id }))))
    }

    #[tokio::test]
    async fn generates_id_when_absent() {
        let resp = RequestIdLayer
            .layer(service_fn(echo))
            .oneshot(RpcRequest::new("/m", json!({})))
            .await
            .unwrap();

        let id = resp.request_id.clone().unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(resp.message["seen"], json!(id));
    }

    #[tokio::test]
    async fn keeps_id_from_metadata() {
        let mut req = RpcRequest::new("/m", json!({}));
        req.metadata.insert(REQUEST_ID_HEADER, "abc-123".parse().unwrap());

        let resp = RequestIdLayer.layer(service_fn(echo)).oneshot(req).await.unwrap();
        assert_eq!(resp.request_id.as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn errors_carry_the_id() {
        let failing = service_fn(|_req: RpcRequest| async move {
            Err::<RpcResponse, _>(Status::not_found("no such volume"))
        });
        let mut req = RpcRequest::new("/m", json!({}));
        req.request_id = Some("r-9".into());

        let err = RequestIdLayer.layer(failing).oneshot(req).await.unwrap_err();
        assert_eq!(err.request_id(), Some("r-9"));
    }
}
