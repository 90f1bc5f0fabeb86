//! Wallet capability and its two realizations
//!
//! Consumers resolve `dyn Wallet` from the container and never learn which
//! realization backs it; the entry sequencer picks one from configuration.
//! Key management itself lives outside this crate.

use std::sync::Arc;

use metabasenet_core::docker::{CapabilityRegistry, Module, ModuleContext};
use metabasenet_core::{Result, Uint256};
use parking_lot::Mutex;
use tracing::info;

/// What the rest of the node may ask of a wallet.
pub trait Wallet: Send + Sync {
    /// Whether signing is available
    fn ready(&self) -> bool;

    /// Addresses under watch
    fn address_count(&self) -> usize;

    /// Start watching an address
    fn watch_address(&self, address: Uint256);
}

/// The signing wallet realization.
pub struct HotWallet {
    addresses: Mutex<Vec<Uint256>>,
}

impl HotWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            addresses: Mutex::new(Vec::new()),
        })
    }
}

impl Wallet for HotWallet {
    fn ready(&self) -> bool {
        true
    }

    fn address_count(&self) -> usize {
        self.addresses.lock().len()
    }

    fn watch_address(&self, address: Uint256) {
        self.addresses.lock().push(address);
    }
}

impl Module for HotWallet {
    fn name(&self) -> &'static str {
        "wallet"
    }

    fn initialize(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        info!("wallet ready");
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        self.addresses.lock().clear();
        Ok(())
    }

    fn declare(self: &Arc<Self>, caps: &mut CapabilityRegistry) {
        caps.provide::<dyn Wallet>(self.clone());
    }
}

/// Placeholder realization for nodes running without a wallet.
pub struct DummyWallet;

impl DummyWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Wallet for DummyWallet {
    fn ready(&self) -> bool {
        false
    }

    fn address_count(&self) -> usize {
        0
    }

    fn watch_address(&self, _address: Uint256) {}
}

impl Module for DummyWallet {
    fn name(&self) -> &'static str {
        "wallet"
    }

    fn initialize(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        info!("wallet disabled; running with dummy realization");
        Ok(())
    }

    fn declare(self: &Arc<Self>, caps: &mut CapabilityRegistry) {
        caps.provide::<dyn Wallet>(self.clone());
    }
}
