//! JSON-RPC Server
//!
//! jsonrpsee over HTTP/WebSocket, bound to localhost by default.

use crate::handler::RpcHandler;
use crate::types::{
    JobIdRequest, ListSchedulesRequest, MaintenanceRequest, RegisterScheduleRequest,
    ScheduleNameRequest, StatsRequest, SubmitRequest,
};
use courier_core::application::Dispatcher;
use courier_core::port::{Maintenance, MaintenanceConfig};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9627;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port
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
    pub fn new(
        config: RpcServerConfig,
        dispatcher: Arc<Dispatcher>,
        maintenance: Arc<dyn Maintenance>,
        maintenance_config: MaintenanceConfig,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(dispatcher, maintenance, maintenance_config)),
        }
    }

    /// Start the JSON-RPC server. Returns the bound address and the handle
    /// used to stop it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        // Jobs
        let handler = self.handler.clone();
        module
            .register_async_method("jobs.submit.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubmitRequest = params.parse()?;
                    handler.submit(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdRequest = params.parse()?;
                    handler.status(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.cancel.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdRequest = params.parse()?;
                    handler.cancel(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Recurring schedules
        let handler = self.handler.clone();
        module
            .register_async_method("schedules.register.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RegisterScheduleRequest = params.parse()?;
                    handler.register_schedule(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("schedules.unregister.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ScheduleNameRequest = params.parse()?;
                    handler.unregister_schedule(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("schedules.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ListSchedulesRequest = params.parse()?;
                    handler.list_schedules(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin
        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StatsRequest = params.parse()?;
                    handler.stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.maintenance.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: MaintenanceRequest = params.parse()?;
                    handler.maintenance(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}
