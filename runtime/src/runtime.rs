//! Runtime façade: wires the shared region, heap and kernel registry into
//! an orchestrator and adds scope pairing.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::*;
use crate::kernel::KernelRegistry;
use crate::orchestrator::Orchestrator;
use crate::shm::SharedRegion;

pub struct Runtime {
    orchestrator: Orchestrator,
}

impl Runtime {
    pub fn new(
        region: SharedRegion,
        registry: Arc<KernelRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        Ok(Self { orchestrator: Orchestrator::new(region, registry, config)? })
    }

    pub fn orchestrator(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    /// Run `body` inside a heap scope. The scope is closed on every exit
    /// path; intermediate outputs allocated by the body are released once
    /// it returns.
    pub fn scope<R>(&mut self, body: impl FnOnce(&mut Orchestrator) -> Result<R>) -> Result<R> {
        self.orchestrator.scope_begin();
        let result = body(&mut self.orchestrator);
        let closed = self.orchestrator.scope_end();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Signal that the program has issued its last submission.
    pub fn orchestration_done(&self) {
        self.orchestrator.orchestration_done();
    }

    pub fn set_graph_output(&self, addr: u64, size: u64) {
        self.orchestrator.set_graph_output(addr, size);
    }
}
