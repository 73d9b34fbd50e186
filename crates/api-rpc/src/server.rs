//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP on a configurable address (localhost by default).

use crate::handler::RpcHandler;
use crate::types::{EnqueueRequest, GetJobRequest};
use courier_core::error::{AppError, Result};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 7600;

fn register_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Failed to register RPC method: {}", e))
}

/// RPC Server Configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    fn module(&self) -> Result<RpcModule<()>> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.enqueue.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: EnqueueRequest = params.parse()?;
                    handler.enqueue(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GetJobRequest = params.parse()?;
                    handler.get_job(req).await
                }
            })
            .map_err(register_error)?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.stats().await }
            })
            .map_err(register_error)?;

        Ok(module)
    }

    /// Bind and start serving; returns the handle and the bound address
    ///
    /// Port 0 binds an ephemeral port (tests).
    pub async fn start(self) -> Result<(ServerHandle, SocketAddr)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let module = self.module()?;

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((server.start(module), local_addr))
    }
}
