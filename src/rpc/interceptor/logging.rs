//! Request and response logging.

use std::task::{Context, Poll};

use serde_json::Value;
use tower::{Layer, Service};

use super::RpcFuture;
use crate::observability::LineWriter;
use crate::rpc::status::Status;
use crate::rpc::types::{RpcRequest, RpcResponse};

const REDACTED: &str = "***stripped***";

/// Logs each inbound request as one line.
#[derive(Debug, Clone)]
pub struct RequestLogLayer {
    out: LineWriter,
}

impl RequestLogLayer {
    pub fn new(out: LineWriter) -> Self {
        Self { out }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog {
            inner,
            out: self.out.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLog<S> {
    inner: S,
    out: LineWriter,
}

impl<S> Service<RpcRequest> for RequestLog<S>
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
        self.out.write_line(format_args!(
            "{}: REQ {}: {}",
            req.method,
            req.request_id.as_deref().unwrap_or("-"),
            render(&req.message)
        ));
        Box::pin(self.inner.call(req))
    }
}

/// Logs each reply, successes to `out` and errors to `err`.
#[derive(Debug, Clone)]
pub struct ResponseLogLayer {
    out: LineWriter,
    err: LineWriter,
}

impl ResponseLogLayer {
    pub fn new(out: LineWriter, err: LineWriter) -> Self {
        Self { out, err }
    }
}

impl<S> Layer<S> for ResponseLogLayer {
    type Service = ResponseLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseLog {
            inner,
            out: self.out.clone(),
            err: self.err.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseLog<S> {
    inner: S,
    out: LineWriter,
    err: LineWriter,
}

impl<S> Service<RpcRequest> for ResponseLog<S>
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
        let method = req.method.clone();
        let id = req.request_id.clone().unwrap_or_else(|| "-".to_string());
        let out = self.out.clone();
        let err = self.err.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            match &result {
                Ok(resp) => out.write_line(format_args!("{method}: REP {id}: {}", render(&resp.message))),
                Err(status) => err.write_line(format_args!("{method}: REP {id}: {status}")),
            }
            result
        })
    }
}

/// Compact JSON with secret-bearing fields masked.
fn render(message: &Value) -> String {
    let mut copy = message.clone();
    redact(&mut copy);
    copy.to_string()
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key.to_ascii_lowercase().contains("secret") {
                    *field = Value::String(REDACTED.to_string());
                } else {
                    redact(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
