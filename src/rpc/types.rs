//! Request, response, and service seams of the RPC layer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;

use crate::error::ServeError;
use crate::lifecycle::ShutdownSignal;
use crate::net::Listener;
use crate::rpc::status::Status;

/// One decoded unary call.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// Full method path, e.g. `/csi.v1.Node/NodeGetInfo`.
    pub method: String,
    pub request_id: Option<String>,
    /// Request headers as received.
    pub metadata: HeaderMap,
    pub message: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, message: Value) -> Self {
        Self {
            method: method.into(),
            request_id: None,
            metadata: HeaderMap::new(),
            message,
        }
    }
}

/// A successful unary reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub request_id: Option<String>,
    pub message: Value,
}

impl RpcResponse {
    pub fn new(message: Value) -> Self {
        Self {
            request_id: None,
            message,
        }
    }
}

/// Declared shape of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub path: String,
    /// Top-level fields that must be present and non-empty.
    pub required_fields: Vec<String>,
}

impl MethodDescriptor {
    pub fn new(path: impl Into<String>, required_fields: &[&str]) -> Self {
        Self {
            path: path.into(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Method descriptors indexed by path.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodDescriptor>,
}

impl MethodTable {
    pub fn new(descriptors: impl IntoIterator<Item = MethodDescriptor>) -> Self {
        Self {
            methods: descriptors
                .into_iter()
                .map(|d| (d.path.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&MethodDescriptor> {
        self.methods.get(path)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Answers unary RPCs.
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    /// Methods this service implements.
    fn methods(&self) -> Vec<MethodDescriptor>;

    /// Handle one call. Unknown methods should yield `Unimplemented`.
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, Status>;
}

/// The native storage control plane.
///
/// Besides answering RPCs it runs its own server. `serve` blocks until
/// `signal` fires or the server fails; when `listener` is `None` the control
/// plane does not accept connections of its own.
#[async_trait]
pub trait ControlPlane: RpcService {
    async fn serve(
        &self,
        signal: ShutdownSignal,
        listener: Option<Arc<dyn Listener>>,
    ) -> Result<(), ServeError>;

    /// Drain in-flight work and stop serving.
    async fn graceful_stop(&self);
}
