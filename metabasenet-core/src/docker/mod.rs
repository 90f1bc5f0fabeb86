//! Module container ("docker")
//!
//! Owns every long-lived service module and drives its lifecycle:
//! `Initialize -> Run -> Halt -> Deinitialize`, forward in attach order,
//! unwinding in reverse. The container never partially runs: either every
//! module reached `run` or none remain running.

pub mod bus;
pub mod capability;
pub mod mode;

pub use bus::{Bus, BusEvent};
pub use capability::CapabilityRegistry;
pub use mode::{Mode, ModuleKind};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::{MetabaseError, Result};

/// Context handed to modules during `initialize`
pub struct ModuleContext<'a> {
    /// The container's event bus
    pub bus: &'a Bus,
    /// Capabilities declared by previously attached modules
    pub capabilities: &'a CapabilityRegistry,
}

/// A long-lived service with a stable name and a four-phase lifecycle.
///
/// Lifecycle calls happen on one thread and must not recurse into the
/// container. All phases default to no-ops so thin modules only implement
/// what they need.
pub trait Module: Send + Sync + 'static {
    /// Stable module name, unique within a container
    fn name(&self) -> &'static str;

    fn initialize(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        Ok(())
    }

    fn run(&self) -> Result<()> {
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        Ok(())
    }

    fn deinitialize(&self) -> Result<()> {
        Ok(())
    }

    /// Declare the capabilities this module satisfies. Called once at
    /// attach time with the module's shared handle.
    fn declare(self: &Arc<Self>, _caps: &mut CapabilityRegistry)
    where
        Self: Sized,
    {
    }
}

/// Container lifecycle phase; advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Constructed,
    Initialized,
    Running,
    Halted,
    Deinitialized,
}

/// The process-wide owner of attached modules.
pub struct Docker {
    modules: Vec<Arc<dyn Module>>,
    index: HashMap<&'static str, usize>,
    capabilities: CapabilityRegistry,
    bus: Bus,
    phase: LifecyclePhase,
}

impl Default for Docker {
    fn default() -> Self {
        Self::new()
    }
}

impl Docker {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            index: HashMap::new(),
            capabilities: CapabilityRegistry::new(),
            bus: Bus::new(),
            phase: LifecyclePhase::Constructed,
        }
    }

    /// Attach a module, recording its capabilities.
    ///
    /// Rejects duplicate names and attachment after the lifecycle has
    /// started, returning `false`; the caller discards the instance.
    pub fn attach<M: Module>(&mut self, module: Arc<M>) -> bool {
        if self.phase != LifecyclePhase::Constructed {
            warn!(
                module = module.name(),
                phase = ?self.phase,
                "attach rejected: container lifecycle already started"
            );
            return false;
        }
        let name = module.name();
        if self.index.contains_key(name) {
            warn!(module = name, "attach rejected: duplicate module name");
            return false;
        }
        module.declare(&mut self.capabilities);
        self.index.insert(name, self.modules.len());
        self.modules.push(module);
        true
    }

    /// Look up a module by exact name
    pub fn get_object(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.index.get(name).map(|&pos| self.modules[pos].clone())
    }

    /// Resolve a capability handle declared by an attached module
    pub fn capability<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.capabilities.resolve::<C>()
    }

    /// The container's event bus
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Number of attached modules
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Initialize every module in attach order.
    ///
    /// On the first failure the failed module is deinitialized, the
    /// already-initialized prefix receives `halt` then `deinitialize` in
    /// reverse attach order, and `ModuleInitFailed` is returned.
    pub fn initialize(&mut self) -> Result<()> {
        if self.phase != LifecyclePhase::Constructed {
            return Err(MetabaseError::Config(format!(
                "container initialize in phase {:?}",
                self.phase
            )));
        }

        for pos in 0..self.modules.len() {
            let module = self.modules[pos].clone();
            let ctx = ModuleContext {
                bus: &self.bus,
                capabilities: &self.capabilities,
            };
            if let Err(e) = module.initialize(&ctx) {
                warn!(module = module.name(), error = %e, "module initialization failed");
                if let Err(de) = module.deinitialize() {
                    warn!(module = module.name(), error = %de, "deinitialize failed during unwind");
                }
                self.unwind(pos);
                self.phase = LifecyclePhase::Deinitialized;
                return Err(MetabaseError::ModuleInitFailed {
                    name: module.name().to_string(),
                    source: Box::new(e),
                });
            }
        }
        self.phase = LifecyclePhase::Initialized;
        Ok(())
    }

    /// Initialize (if not done) then run every module in attach order.
    ///
    /// A run failure unwinds every initialized module; the container never
    /// partially runs.
    pub fn run(&mut self) -> Result<()> {
        if self.phase == LifecyclePhase::Constructed {
            self.initialize()?;
        }
        if self.phase != LifecyclePhase::Initialized {
            return Err(MetabaseError::Config(format!(
                "container run in phase {:?}",
                self.phase
            )));
        }

        for pos in 0..self.modules.len() {
            let module = self.modules[pos].clone();
            if let Err(e) = module.run() {
                warn!(module = module.name(), error = %e, "module run failed");
                self.unwind(self.modules.len());
                self.phase = LifecyclePhase::Deinitialized;
                return Err(MetabaseError::ModuleRunFailed {
                    name: module.name().to_string(),
                    source: Box::new(e),
                });
            }
            info!(module = module.name(), "module running");
        }
        self.phase = LifecyclePhase::Running;
        Ok(())
    }

    /// Halt every module in reverse attach order
    pub fn halt(&mut self) {
        if self.phase != LifecyclePhase::Running {
            return;
        }
        for module in self.modules.iter().rev() {
            if let Err(e) = module.halt() {
                warn!(module = module.name(), error = %e, "module halt failed");
            }
        }
        self.phase = LifecyclePhase::Halted;
    }

    /// Deinitialize every module in reverse attach order
    pub fn deinitialize(&mut self) {
        if self.phase != LifecyclePhase::Initialized && self.phase != LifecyclePhase::Halted {
            return;
        }
        for module in self.modules.iter().rev() {
            if let Err(e) = module.deinitialize() {
                warn!(module = module.name(), error = %e, "module deinitialize failed");
            }
        }
        self.phase = LifecyclePhase::Deinitialized;
    }

    /// Shut the container down: `halt` then `deinitialize` every module in
    /// reverse attach order, logging and swallowing individual failures.
    /// Idempotent.
    pub fn exit(&mut self) {
        match self.phase {
            LifecyclePhase::Running => {
                self.halt();
                self.deinitialize();
            }
            LifecyclePhase::Initialized | LifecyclePhase::Halted => {
                self.deinitialize();
            }
            LifecyclePhase::Constructed | LifecyclePhase::Deinitialized => {}
        }
        info!(modules = self.modules.len(), "container exited");
    }

    /// Halt then deinitialize modules `0..count` in reverse attach order,
    /// logging failures.
    fn unwind(&mut self, count: usize) {
        for module in self.modules[..count].iter().rev() {
            if let Err(e) = module.halt() {
                warn!(module = module.name(), error = %e, "halt failed during unwind");
            }
        }
        for module in self.modules[..count].iter().rev() {
            if let Err(e) = module.deinitialize() {
                warn!(module = module.name(), error = %e, "deinitialize failed during unwind");
            }
        }
    }
}
