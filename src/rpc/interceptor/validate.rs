//! Required-field validation.

use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use super::RpcFuture;
use crate::rpc::status::Status;
use crate::rpc::types::{MethodTable, RpcRequest, RpcResponse};

/// Rejects calls missing a required field before they reach the handler.
///
/// Methods absent from the table pass through untouched.
#[derive(Debug, Clone)]
pub struct ValidateLayer {
    methods: Arc<MethodTable>,
}

impl ValidateLayer {
    pub fn new(methods: Arc<MethodTable>) -> Self {
        Self { methods }
    }
}

impl<S> Layer<S> for ValidateLayer {
    type Service = Validate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Validate {
            inner,
            methods: self.methods.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Validate<S> {
    inner: S,
    methods: Arc<MethodTable>,
}

impl<S> Service<RpcRequest> for Validate<S>
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

    fn call(&mut self, req: RpcRequest) -> Self::Future {
        if let Some(descriptor) = self.methods.get(&req.method) {
            if let Err(status) = check_required(&req.message, &descriptor.required_fields) {
                return Box::pin(std::future::ready(Err(status)));
            }
        }
        Box::pin(self.inner.call(req))
    }
}

/// Verify every field in `required` is present and non-empty.
pub fn check_required(message: &Value, required: &[String]) -> Result<(), Status> {
    if required.is_empty() {
        return Ok(());
    }
    let Some(fields) = message.as_object() else {
        return Err(Status::invalid_argument("request message must be an object"));
    };
    for name in required {
        if fields.get(name).map_or(true, is_empty) {
            return Err(Status::invalid_argument(format!("required: {name}")));
        }
    }
    Ok(())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::status::Code;
    use crate::rpc::types::MethodDescriptor;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceExt};

    fn table() -> Arc<MethodTable> {
        Arc::new(MethodTable::new([MethodDescriptor::new(
            "/csi.v1.Node/NodePublishVolume",
            &["VolumeId", "TargetPath"],
        )]))
    }

    #[tokio::test]
    async fn missing_field_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = ValidateLayer::new(table()).layer(service_fn(move |_req: RpcRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok::<_, Status>(RpcResponse::new(json!({}))))
        }));

        let req = RpcRequest::new(
            "/csi.v1.Node/NodePublishVolume",
            json!({"VolumeId": "v1", "TargetPath": ""}),
        );
        let err = svc.clone().oneshot(req).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "required: TargetPath");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let req = RpcRequest::new(
            "/csi.v1.Node/NodePublishVolume",
            json!({"VolumeId": "v1", "TargetPath": "/mnt/v1"}),
        );
        svc.oneshot(req).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_methods_pass_through() {
        let svc = ValidateLayer::new(table()).layer(service_fn(|_req: RpcRequest| {
            std::future::ready(Ok::<_, Status>(RpcResponse::new(json!({"ok": true}))))
        }));
        let resp = svc
            .oneshot(RpcRequest::new("/csi.v1.Identity/Probe", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.message, json!({"ok": true}));
    }

    #[test]
    fn emptiness_rules() {
        let required = vec!["A".to_string()];
        for bad in [json!({}), json!({"A": null}), json!({"A": []}), json!({"A": {}}), json!([1])] {
            assert!(check_required(&bad, &required).is_err(), "{bad}");
        }
        for good in [json!({"A": 0}), json!({"A": false}), json!({"A": "x"}), json!({"A": [1]})] {
            assert!(check_required(&good, &required).is_ok(), "{good}");
        }
        assert!(check_required(&json!(null), &[]).is_ok());
    }
}
