//! Module realizations the entry sequencer attaches
//!
//! Wallet selection, RPC host wiring, persisted statistics and bus-driven
//! dispatch are concrete here. The remaining subsystems (consensus,
//! networking, block validation) are service shells with the right names,
//! lifecycle and bus topics: the skeleton their implementations slot into.

pub mod datastat;
pub mod rpc;
pub mod wallet;

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use bytes::Bytes;
use metabasenet_core::ctsdb::CtsConfig;
use metabasenet_core::docker::{
    Bus, BusEvent, CapabilityRegistry, Docker, Module, ModuleContext, ModuleKind,
};
use metabasenet_core::{MetabaseError, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use datastat::DataStatModule;
use rpc::{HttpServerService, RpcHost, RpcHostConfig, RpcModeService};
use wallet::{DummyWallet, HotWallet};

/// Bus topics the dispatcher publishes and the channels consume
pub mod topic {
    pub const BLOCK: &str = "block";
    pub const CERT_TX: &str = "cert-tx";
    pub const USER_TX: &str = "user-tx";
    pub const DELEGATED: &str = "delegated";
    pub const PEER: &str = "peer";
}

/// Forwarding surface the dispatcher offers to block and transaction
/// producers.
pub trait Dispatch: Send + Sync {
    /// Announce a sealed block
    fn dispatch_block(&self, block: Bytes) -> usize;

    /// Announce a transaction under the given topic
    fn dispatch_tx(&self, topic: &'static str, tx: Bytes) -> usize;
}

/// Publishes node events onto the container bus, keeping producers and
/// channels decoupled.
pub struct DispatcherService {
    bus: Bus,
}

impl DispatcherService {
    pub fn new(bus: Bus) -> Arc<Self> {
        Arc::new(Self { bus })
    }
}

impl Dispatch for DispatcherService {
    fn dispatch_block(&self, block: Bytes) -> usize {
        self.bus.publish(topic::BLOCK, block)
    }

    fn dispatch_tx(&self, topic: &'static str, tx: Bytes) -> usize {
        self.bus.publish(topic, tx)
    }
}

impl Module for DispatcherService {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    fn declare(self: &Arc<Self>, caps: &mut CapabilityRegistry) {
        caps.provide::<dyn Dispatch>(self.clone());
    }
}

/// A named service shell: full lifecycle, optional bus subscription, no
/// in-scope behavior of its own.
pub struct NodeService {
    name: &'static str,
    subscribe_topic: Option<&'static str>,
    inbox: Mutex<Option<Receiver<BusEvent>>>,
}

impl NodeService {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            subscribe_topic: None,
            inbox: Mutex::new(None),
        })
    }

    pub fn with_topic(name: &'static str, topic: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            subscribe_topic: Some(topic),
            inbox: Mutex::new(None),
        })
    }

    /// Events waiting in the service inbox
    pub fn pending_events(&self) -> usize {
        self.inbox
            .lock()
            .as_ref()
            .map_or(0, |rx| rx.try_iter().count())
    }
}

impl Module for NodeService {
    fn name(&self) -> &'static str {
        self.name
    }

    fn initialize(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        if let Some(topic) = self.subscribe_topic {
            *self.inbox.lock() = Some(ctx.bus.subscribe(topic));
            debug!(module = self.name, topic, "subscribed");
        }
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        let drained = self.pending_events();
        if drained > 0 {
            debug!(module = self.name, drained, "dropped undelivered events");
        }
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        *self.inbox.lock() = None;
        Ok(())
    }
}

/// Construct and attach the realization for a module kind.
///
/// `Lock` is a pseudo-module the entry sequencer handles before any
/// module may touch the data directory.
pub fn attach_kind(docker: &mut Docker, kind: ModuleKind, config: &Config) -> Result<()> {
    let name = kind.module_name();
    let attached = match kind {
        // Acquired by the entry sequencer before any module attaches
        ModuleKind::Lock => return Ok(()),
        ModuleKind::Wallet => {
            if config.wallet_enabled {
                docker.attach(HotWallet::new())
            } else {
                docker.attach(DummyWallet::new())
            }
        }
        ModuleKind::Dispatcher => docker.attach(DispatcherService::new(docker.bus().clone())),
        ModuleKind::HttpServer => docker.attach(HttpServerService::new()),
        ModuleKind::RpcMode => {
            // Host endpoints are registered through the capability the
            // http server declared, never by downcasting the module.
            let host = docker.capability::<dyn RpcHost>().ok_or_else(|| {
                MetabaseError::ModuleInitFailed {
                    name: name.to_string(),
                    source: Box::new(MetabaseError::Config(
                        "rpc mode requires the http server module".into(),
                    )),
                }
            })?;
            host.add_host(RpcHostConfig {
                listen: config.rpc_listen,
                max_connections: 64,
            });
            docker.attach(RpcModeService::new())
        }
        ModuleKind::DataStat => docker.attach(DataStatModule::new(
            config.data_dir.join(datastat::DATASTAT_DB),
            CtsConfig {
                bucket_width: config.bucket_width,
                compress: config.compress_chunks,
            },
        )),
        ModuleKind::NetChannel => docker.attach(NodeService::with_topic(name, topic::PEER)),
        ModuleKind::BlockChannel => docker.attach(NodeService::with_topic(name, topic::BLOCK)),
        ModuleKind::CertTxChannel => docker.attach(NodeService::with_topic(name, topic::CERT_TX)),
        ModuleKind::UserTxChannel => docker.attach(NodeService::with_topic(name, topic::USER_TX)),
        ModuleKind::DelegatedChannel => {
            docker.attach(NodeService::with_topic(name, topic::DELEGATED))
        }
        ModuleKind::Service => docker.attach(NodeService::with_topic(name, topic::BLOCK)),
        ModuleKind::BlockMaker
        | ModuleKind::CoreProtocol
        | ModuleKind::HttpGet
        | ModuleKind::Network
        | ModuleKind::RpcClient
        | ModuleKind::TxPool
        | ModuleKind::BlockChain
        | ModuleKind::ForkManager
        | ModuleKind::Consensus
        | ModuleKind::Recovery => docker.attach(NodeService::new(name)),
    };

    if !attached {
        return Err(MetabaseError::Config(format!(
            "module '{}' could not be attached",
            name
        )));
    }
    info!(module = name, "module attached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_reaches_subscribed_channels() {
        let mut docker = Docker::new();
        docker.attach(DispatcherService::new(docker.bus().clone()));
        let blocks = NodeService::with_topic("blockchannel", topic::BLOCK);
        let txs = NodeService::with_topic("usertxchannel", topic::USER_TX);
        docker.attach(blocks.clone());
        docker.attach(txs.clone());
        docker.run().unwrap();

        let dispatch = docker.capability::<dyn Dispatch>().unwrap();
        assert_eq!(dispatch.dispatch_block(Bytes::from_static(b"b")), 1);
        assert_eq!(dispatch.dispatch_tx(topic::USER_TX, Bytes::from_static(b"t")), 1);

        assert_eq!(blocks.pending_events(), 1);
        assert_eq!(txs.pending_events(), 1);
        docker.exit();
    }
}
