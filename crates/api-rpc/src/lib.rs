//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 server through which producers enqueue jobs and operators
//! inspect jobs and worker utilization.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
