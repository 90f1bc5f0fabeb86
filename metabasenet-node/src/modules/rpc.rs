//! RPC host wiring
//!
//! The HTTP server module exposes an `RpcHost` capability; the RPC-mode
//! entry step resolves it and registers host endpoints. The JSON-RPC
//! handlers themselves live outside this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use metabasenet_core::docker::{CapabilityRegistry, Module, ModuleContext};
use metabasenet_core::util::net::is_routable;
use metabasenet_core::{MetabaseError, Result};
use parking_lot::Mutex;
use tracing::{info, warn};

/// One RPC listen endpoint
#[derive(Debug, Clone)]
pub struct RpcHostConfig {
    pub listen: SocketAddr,
    pub max_connections: usize,
}

/// Registration surface the HTTP server offers to RPC wiring.
pub trait RpcHost: Send + Sync {
    /// Register a listen endpoint
    fn add_host(&self, config: RpcHostConfig);

    /// Registered endpoints
    fn hosts(&self) -> Vec<RpcHostConfig>;
}

/// HTTP transport module; owns the registered RPC endpoints.
pub struct HttpServerService {
    hosts: Mutex<Vec<RpcHostConfig>>,
}

impl HttpServerService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hosts: Mutex::new(Vec::new()),
        })
    }
}

impl RpcHost for HttpServerService {
    fn add_host(&self, config: RpcHostConfig) {
        if is_routable(&config.listen.ip()) {
            warn!(listen = %config.listen, "RPC endpoint listens on a routable address");
        }
        self.hosts.lock().push(config);
    }

    fn hosts(&self) -> Vec<RpcHostConfig> {
        self.hosts.lock().clone()
    }
}

impl Module for HttpServerService {
    fn name(&self) -> &'static str {
        "httpserver"
    }

    fn initialize(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        for host in self.hosts.lock().iter() {
            info!(listen = %host.listen, max_connections = host.max_connections, "rpc host registered");
        }
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        self.hosts.lock().clear();
        Ok(())
    }

    fn declare(self: &Arc<Self>, caps: &mut CapabilityRegistry) {
        caps.provide::<dyn RpcHost>(self.clone());
    }
}

/// JSON-RPC dispatch module; requires an `RpcHost` provider with at least
/// one registered endpoint.
pub struct RpcModeService;

impl RpcModeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Module for RpcModeService {
    fn name(&self) -> &'static str {
        "rpcmod"
    }

    fn initialize(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        let host = ctx
            .capabilities
            .resolve::<dyn RpcHost>()
            .ok_or_else(|| MetabaseError::Config("no rpc host capability".into()))?;
        let hosts = host.hosts();
        if hosts.is_empty() {
            return Err(MetabaseError::Config("no rpc endpoints registered".into()));
        }
        info!(endpoints = hosts.len(), "rpc dispatch attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_registration() {
        let server = HttpServerService::new();
        server.add_host(RpcHostConfig {
            listen: "127.0.0.1:8812".parse().unwrap(),
            max_connections: 64,
        });
        assert_eq!(server.hosts().len(), 1);
        assert_eq!(server.hosts()[0].max_connections, 64);
    }
}
