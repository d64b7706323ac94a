use std::sync::Arc;

use anyhow::Result;

use crate::apply::{ApplyOrchestrator, MorphClient, PatchMerger};
use crate::packages::PackageReconciler;
use crate::sandbox::local::LocalSandboxFactory;
use crate::sandbox::manager::SandboxManager;
use crate::shared::SpaceConfig;

/// Shared services handed to every handler.
pub struct AppState {
    pub sandboxes: Arc<SandboxManager>,
    pub orchestrator: ApplyOrchestrator,
    pub reconciler: PackageReconciler,
}

impl AppState {
    pub fn from_config(config: SpaceConfig) -> Result<Self> {
        let merger = MorphClient::from_config(&config.morph)?
            .map(|client| Arc::new(client) as Arc<dyn PatchMerger>);
        let factory = Arc::new(LocalSandboxFactory::new(config.sandbox.clone()));

        Ok(Self {
            sandboxes: Arc::new(SandboxManager::new(factory)),
            orchestrator: ApplyOrchestrator::new(merger),
            reconciler: PackageReconciler::new(config.packages.clone()),
        })
    }
}
