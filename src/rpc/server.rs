//! Unary RPC server over HTTP/2.
//!
//! Each accepted connection is served by hyper's HTTP/2 server and watched
//! by a [`GracefulShutdown`], so stopping drains in-flight calls before
//! connections close.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::{HeaderMap, HeaderValue, Method, Request, Response};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::graceful::GracefulShutdown;
use tower::util::BoxCloneService;
use tower::ServiceExt;

use crate::error::ServeError;
use crate::lifecycle::Shutdown;
use crate::mux::matcher::GRPC_CONTENT_TYPE;
use crate::net::{accept_with_backoff, ConnectionId, Listener};
use crate::observability::metrics::record_rpc;
use crate::rpc::codec::{self, MAX_MESSAGE_BYTES};
use crate::rpc::interceptor::{intercept, Dispatch, RpcLogs, REQUEST_ID_HEADER};
use crate::rpc::status::{Code, Status};
use crate::rpc::types::{MethodTable, RpcRequest, RpcResponse, RpcService};

/// The full handler stack, type-erased.
pub type RpcHandler = BoxCloneService<RpcRequest, RpcResponse, Status>;

type GrpcBody = BoxBody<Bytes, Infallible>;

pub struct RpcServer {
    handler: Mutex<RpcHandler>,
    graceful: Mutex<Option<GracefulShutdown>>,
    stopping: Shutdown,
    max_message_bytes: usize,
}

impl RpcServer {
    /// Serve an already-composed handler.
    pub fn new(handler: RpcHandler) -> Self {
        Self {
            handler: Mutex::new(handler),
            graceful: Mutex::new(Some(GracefulShutdown::new())),
            stopping: Shutdown::new(),
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }

    /// Serve `service` behind the default interceptor stack.
    pub fn for_service<T: RpcService + ?Sized>(service: Arc<T>, logs: &RpcLogs) -> Self {
        let methods = Arc::new(MethodTable::new(service.methods()));
        let stack = intercept(Dispatch::new(service), logs, methods);
        Self::new(BoxCloneService::new(stack))
    }

    /// Cap on a request body.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_triggered()
    }

    fn handler(&self) -> RpcHandler {
        lock(&self.handler).clone()
    }

    /// Accept and serve connections from `listener`.
    ///
    /// Returns `Ok(())` once [`graceful_stop`](Self::graceful_stop) has been
    /// called, [`ServeError::ServerClosed`] if it was called before serving,
    /// and the listener's error if accepting fails, including
    /// [`ListenerError::Closed`](crate::net::ListenerError::Closed).
    pub async fn serve(&self, listener: Arc<dyn Listener>) -> Result<(), ServeError> {
        let mut stopping = self.stopping.subscribe();
        if stopping.is_triggered() {
            return Err(ServeError::ServerClosed);
        }

        tracing::info!(listener = %listener.describe(), "RPC server serving");
        let mut attempts = 0;

        loop {
            let io = tokio::select! {
                biased;
                _ = stopping.recv() => return Ok(()),
                res = accept_with_backoff(&*listener, &mut attempts) => res?,
            };

            let id = ConnectionId::new();
            let handler = self.handler();
            let limit = self.max_message_bytes;
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handle(handler, req, limit).await) }
            });
            let conn = http2::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(io), service);

            let watched = match lock(&self.graceful).as_ref() {
                Some(graceful) => graceful.watch(conn),
                None => return Ok(()),
            };
            tokio::spawn(async move {
                if let Err(e) = watched.await {
                    tracing::debug!(connection_id = %id, error = %e, "RPC connection error");
                }
            });
        }
    }

    /// Stop accepting, then wait for in-flight calls to finish.
    ///
    /// Later calls return immediately.
    pub async fn graceful_stop(&self) {
        self.stopping.trigger();
        let graceful = lock(&self.graceful).take();
        if let Some(graceful) = graceful {
            graceful.shutdown().await;
            tracing::info!("RPC server stopped");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle(handler: RpcHandler, req: Request<Incoming>, limit: usize) -> Response<GrpcBody> {
    let method = req.uri().path().to_string();
    let content_type = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .filter(|v| v.as_bytes().starts_with(GRPC_CONTENT_TYPE.as_bytes()))
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(GRPC_CONTENT_TYPE));

    if req.method() != Method::POST {
        return status_response(Status::unimplemented("RPC calls must use POST"), content_type);
    }

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return status_response(Status::resource_exhausted("request message too large"), content_type);
        }
        Err(e) => return status_response(Status::internal(format!("read request: {e}")), content_type),
    };

    let result = match codec::decode_message(&body) {
        Ok(message) => {
            let request_id = parts
                .headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let rpc = RpcRequest {
                method: method.clone(),
                request_id,
                metadata: parts.headers,
                message,
            };
            handler.oneshot(rpc).await
        }
        Err(status) => Err(status),
    };

    match result {
        Ok(resp) => {
            record_rpc(&method, Code::Ok.as_str());
            ok_response(resp, content_type)
        }
        Err(status) => {
            record_rpc(&method, status.code().as_str());
            status_response(status, content_type)
        }
    }
}

fn ok_response(resp: RpcResponse, content_type: HeaderValue) -> Response<GrpcBody> {
    let frame = match codec::encode_message(&resp.message) {
        Ok(frame) => frame,
        Err(status) => return status_response(status, content_type),
    };

    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    let frames: Vec<Result<Frame<Bytes>, Infallible>> =
        vec![Ok(Frame::data(frame)), Ok(Frame::trailers(trailers))];
    let body = StreamBody::new(futures_util::stream::iter(frames)).boxed();

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(axum::http::header::CONTENT_TYPE, content_type);
    insert_request_id(headers, resp.request_id.as_deref());
    response
}

/// Trailers-only reply carrying `status`.
fn status_response(status: Status, content_type: HeaderValue) -> Response<GrpcBody> {
    let mut response = Response::new(Full::new(Bytes::new()).boxed());
    let headers = response.headers_mut();
    headers.insert(axum::http::header::CONTENT_TYPE, content_type);
    headers.insert("grpc-status", HeaderValue::from(status.code().as_i32()));
    if let Ok(message) = HeaderValue::from_str(&percent_encode(status.message())) {
        headers.insert("grpc-message", message);
    }
    insert_request_id(headers, status.request_id());
    response
}

fn insert_request_id(headers: &mut HeaderMap, id: Option<&str>) {
    if let Some(value) = id.and_then(|id| HeaderValue::from_str(id).ok()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}

/// Percent-encode a `grpc-message` value.
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &b in message.as_bytes() {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
