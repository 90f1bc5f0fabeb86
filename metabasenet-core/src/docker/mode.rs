//! Run modes and the module kinds they instantiate
//!
//! A pure data table consulted once at entry. `Lock` always leads so no
//! module touches the data directory before the process owns it.

use std::str::FromStr;

use crate::MetabaseError;

/// Every module kind a mode may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Lock,
    BlockMaker,
    CoreProtocol,
    Dispatcher,
    HttpGet,
    HttpServer,
    NetChannel,
    BlockChannel,
    CertTxChannel,
    UserTxChannel,
    DelegatedChannel,
    Network,
    RpcClient,
    RpcMode,
    Service,
    TxPool,
    Wallet,
    BlockChain,
    ForkManager,
    Consensus,
    DataStat,
    Recovery,
}

impl ModuleKind {
    /// Canonical instance name for the kind
    pub fn module_name(self) -> &'static str {
        match self {
            ModuleKind::Lock => "lock",
            ModuleKind::BlockMaker => "blockmaker",
            ModuleKind::CoreProtocol => "coreprotocol",
            ModuleKind::Dispatcher => "dispatcher",
            ModuleKind::HttpGet => "httpget",
            ModuleKind::HttpServer => "httpserver",
            ModuleKind::NetChannel => "netchannel",
            ModuleKind::BlockChannel => "blockchannel",
            ModuleKind::CertTxChannel => "certtxchannel",
            ModuleKind::UserTxChannel => "usertxchannel",
            ModuleKind::DelegatedChannel => "delegatedchannel",
            ModuleKind::Network => "network",
            ModuleKind::RpcClient => "rpcclient",
            ModuleKind::RpcMode => "rpcmod",
            ModuleKind::Service => "service",
            ModuleKind::TxPool => "txpool",
            ModuleKind::Wallet => "wallet",
            ModuleKind::BlockChain => "blockchain",
            ModuleKind::ForkManager => "forkmanager",
            ModuleKind::Consensus => "consensus",
            ModuleKind::DataStat => "datastat",
            ModuleKind::Recovery => "recovery",
        }
    }
}

/// A named selection of module kinds to instantiate.
///
/// Purging is not a mode: it is a flag the entry sequencer acts on
/// directly, without consulting this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Miner,
    Client,
}

const SERVER_MODULES: &[ModuleKind] = &[
    ModuleKind::Lock,
    ModuleKind::CoreProtocol,
    ModuleKind::BlockChain,
    ModuleKind::TxPool,
    ModuleKind::ForkManager,
    ModuleKind::Consensus,
    ModuleKind::Wallet,
    ModuleKind::Service,
    ModuleKind::Dispatcher,
    ModuleKind::Network,
    ModuleKind::NetChannel,
    ModuleKind::BlockChannel,
    ModuleKind::CertTxChannel,
    ModuleKind::UserTxChannel,
    ModuleKind::DelegatedChannel,
    ModuleKind::HttpServer,
    ModuleKind::RpcMode,
    ModuleKind::DataStat,
    ModuleKind::Recovery,
];

const MINER_MODULES: &[ModuleKind] = &[
    ModuleKind::Lock,
    ModuleKind::CoreProtocol,
    ModuleKind::BlockChain,
    ModuleKind::TxPool,
    ModuleKind::ForkManager,
    ModuleKind::Consensus,
    ModuleKind::BlockMaker,
    ModuleKind::Wallet,
    ModuleKind::Service,
    ModuleKind::Dispatcher,
    ModuleKind::Network,
    ModuleKind::NetChannel,
    ModuleKind::BlockChannel,
    ModuleKind::CertTxChannel,
    ModuleKind::UserTxChannel,
    ModuleKind::DelegatedChannel,
    ModuleKind::HttpServer,
    ModuleKind::RpcMode,
    ModuleKind::DataStat,
    ModuleKind::Recovery,
];

const CLIENT_MODULES: &[ModuleKind] = &[
    ModuleKind::Lock,
    ModuleKind::HttpGet,
    ModuleKind::RpcClient,
];

impl Mode {
    /// Ordered module kinds this mode instantiates
    pub fn modules(self) -> &'static [ModuleKind] {
        match self {
            Mode::Server => SERVER_MODULES,
            Mode::Miner => MINER_MODULES,
            Mode::Client => CLIENT_MODULES,
        }
    }
}

impl FromStr for Mode {
    type Err = MetabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "miner" => Ok(Mode::Miner),
            "client" => Ok(Mode::Client),
            other => Err(MetabaseError::Config(format!("unknown mode: {}", other))),
        }
    }
}
