//! Unary RPC subsystem.
//!
//! # Data Flow
//! ```text
//! RPC-classified listener
//!     → server.rs (HTTP/2, one task per connection)
//!     → codec.rs (length-prefixed JSON message)
//!     → interceptor/ (request id → request log → response log → validate)
//!     → RpcService::call
//! ```

pub mod codec;
pub mod interceptor;
pub mod server;
pub mod status;
pub mod types;

pub use interceptor::{intercept, Dispatch, RpcLogs};
pub use server::{RpcHandler, RpcServer};
pub use status::{Code, Status};
pub use types::{ControlPlane, MethodDescriptor, MethodTable, RpcRequest, RpcResponse, RpcService};
