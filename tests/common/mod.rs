//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Request};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use volgate::bridge::{BridgeContext, BridgeError, BridgeFactory, LegacyBridge, VolumeRecord};
use volgate::lifecycle::{FatalHandler, ShutdownBarrier, ShutdownSignal, StopObserver, StopPhase};
use volgate::module::{DriverRegistry, GatewayDeps};
use volgate::net::Listener;
use volgate::rpc::codec::{decode_message, encode_message};
use volgate::rpc::{ControlPlane, MethodDescriptor, RpcRequest, RpcResponse, RpcService, Status};
use volgate::{GatewayConfig, ServeError};

pub const PROBE: &str = "/csi.v1.Identity/Probe";
pub const NODE_GET_INFO: &str = "/csi.v1.Node/NodeGetInfo";

/// Ordered record of what happened, shared by mocks and observers.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.all().iter().position(|e| e == event)
    }
}

/// Control plane answering two methods and recording its lifecycle.
pub struct MockControlPlane {
    events: Events,
}

impl MockControlPlane {
    pub fn new(events: Events) -> Self {
        Self { events }
    }
}

#[async_trait]
impl RpcService for MockControlPlane {
    fn methods(&self) -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::new(PROBE, &[]),
            MethodDescriptor::new(NODE_GET_INFO, &["NodeId"]),
        ]
    }

    async fn call(&self, req: RpcRequest) -> Result<RpcResponse, Status> {
        match req.method.as_str() {
            PROBE => Ok(RpcResponse::new(json!({"Ready": true}))),
            NODE_GET_INFO => Ok(RpcResponse::new(json!({"NodeId": req.message["NodeId"]}))),
            other => Err(Status::unimplemented(format!("unknown method {other}"))),
        }
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn serve(
        &self,
        mut signal: ShutdownSignal,
        listener: Option<Arc<dyn Listener>>,
    ) -> Result<(), ServeError> {
        self.events.push(format!("control-plane serving listener={}", listener.is_some()));
        signal.recv().await;
        Ok(())
    }

    async fn graceful_stop(&self) {
        self.events.push("control-plane stopped");
    }
}

/// Bridge whose probe fails a fixed number of times.
pub struct MockBridge {
    failures: usize,
    calls: AtomicUsize,
}

impl MockBridge {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacyBridge for MockBridge {
    async fn list(&self) -> Result<Vec<VolumeRecord>, BridgeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(BridgeError::NotReady("control plane not reachable".into()));
        }
        Ok(vec![VolumeRecord {
            name: "data".into(),
            ..Default::default()
        }])
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(|| async { "legacy-bridge" }))
            .route(
                "/VolumeDriver.List",
                post(|| async { Json(json!({"Volumes": [{"Name": "data"}], "Err": ""})) }),
            )
    }
}

/// A factory that always hands out `bridge`.
pub fn bridge_factory(bridge: Arc<MockBridge>) -> BridgeFactory {
    Arc::new(move |_ctx: BridgeContext<'_>| -> Arc<dyn LegacyBridge> { bridge.clone() })
}

pub fn drivers(events: &Events) -> DriverRegistry {
    let mut drivers = DriverRegistry::new();
    let events = events.clone();
    drivers.register("mock", move |_module: &str, _config: &GatewayConfig| -> Arc<dyn ControlPlane> {
        Arc::new(MockControlPlane::new(events.clone()))
    });
    drivers
}

/// Dependencies wired to mocks, with fatal errors and stop phases recorded.
pub fn deps(events: &Events, bridge: Arc<MockBridge>) -> GatewayDeps {
    let fatal_events = events.clone();
    let fatal: FatalHandler = Arc::new(move |component: &'static str, error: &ServeError| {
        fatal_events.push(format!("fatal {component}: {error}"));
    });
    let phase_events = events.clone();
    let observer: StopObserver = Arc::new(move |phase: StopPhase, barrier: &ShutdownBarrier| {
        phase_events.push(format!(
            "{phase:?} registered={} completed={} outstanding={}",
            barrier.registered(),
            barrier.completed(),
            barrier.outstanding()
        ));
    });

    GatewayDeps {
        drivers: Arc::new(drivers(events)),
        bridge: Some(bridge_factory(bridge)),
        fatal: Some(fatal),
        stop_observer: Some(observer),
        ..Default::default()
    }
}

pub fn gateway_config(endpoint: &str, multiplexed: bool) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.endpoint = Some(endpoint.to_string());
    config.driver = "mock".into();
    config.no_legacy_bridge = !multiplexed;
    config.warmup.interval_ms = 20;
    config.mux.sniff_timeout_ms = 200;
    config
}

/// Send a raw HTTP/1.1 request and read until the server closes.
pub async fn http1_request<T>(mut io: T, request: &str) -> String
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    io.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), io.read_to_end(&mut out))
        .await
        .expect("HTTP/1 response timed out")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

pub struct GrpcReply {
    pub headers: HeaderMap,
    pub status: Option<String>,
    pub message: Option<Value>,
}

/// Make one unary call over an HTTP/2 connection.
pub async fn grpc_call<T>(io: T, path: &str, message: Value) -> GrpcReply
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(io))
        .await
        .unwrap();
    tokio::spawn(conn);

    let req = Request::post(format!("http://volgate{path}"))
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(Full::new(encode_message(&message).unwrap()))
        .unwrap();
    let resp = tokio::time::timeout(Duration::from_secs(5), sender.send_request(req))
        .await
        .expect("gRPC response timed out")
        .unwrap();

    let headers = resp.headers().clone();
    let collected = resp.into_body().collect().await.unwrap();
    let status = collected
        .trailers()
        .and_then(|t| t.get("grpc-status"))
        .or_else(|| headers.get("grpc-status"))
        .map(|v| v.to_str().unwrap().to_string());
    let body: Bytes = collected.to_bytes();
    let message = (!body.is_empty()).then(|| decode_message(&body).unwrap());

    GrpcReply {
        headers,
        status,
        message,
    }
}

/// Plain HTTP/2 GET, no RPC content type.
pub async fn h2_get<T>(io: T, path: &str) -> (u16, String)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(io))
        .await
        .unwrap();
    tokio::spawn(conn);

    let req = Request::get(format!("http://volgate{path}"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let resp = tokio::time::timeout(Duration::from_secs(5), sender.send_request(req))
        .await
        .expect("HTTP/2 response timed out")
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}
