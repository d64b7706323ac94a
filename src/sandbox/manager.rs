use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::{SandboxError, SandboxProvider};

/// Builds a fresh sandbox for a generated id.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, id: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub active: bool,
}

struct Entry {
    sandbox: Arc<dyn SandboxProvider>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    active_id: Option<String>,
}

impl Registry {
    fn info(&self, id: &str) -> Option<SandboxInfo> {
        self.entries.get(id).map(|entry| SandboxInfo {
            sandbox_id: id.to_string(),
            provider: entry.sandbox.provider_name().to_string(),
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            active: self.active_id.as_deref() == Some(id),
        })
    }
}

/// Owns every live sandbox and the pointer to the active one.
///
/// Removing a sandbox from the registry terminates it, so a handle obtained
/// earlier fails with `SandboxError::Terminated` afterwards.
pub struct SandboxManager {
    factory: Arc<dyn SandboxFactory>,
    registry: RwLock<Registry>,
}

impl SandboxManager {
    pub fn new(factory: Arc<dyn SandboxFactory>) -> Self {
        Self {
            factory,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Create a sandbox through the factory and make it active.
    pub async fn create(&self) -> Result<SandboxInfo, SandboxError> {
        let id = Uuid::new_v4().to_string();
        let sandbox = self.factory.create(&id).await?;
        self.register(sandbox).await
    }

    /// Track an existing provider and make it active.
    pub async fn register(&self, sandbox: Arc<dyn SandboxProvider>) -> Result<SandboxInfo, SandboxError> {
        let id = sandbox.id().to_string();
        let now = Utc::now();
        let mut registry = self.registry.write().await;
        registry.entries.insert(
            id.clone(),
            Entry {
                sandbox,
                created_at: now,
                last_accessed: now,
            },
        );
        registry.active_id = Some(id.clone());
        info!(sandbox_id = %id, "Registered sandbox");
        registry
            .info(&id)
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    #[cfg(test)]
    pub async fn get(&self, id: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .entries
            .get_mut(id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
        entry.last_accessed = Utc::now();
        Ok(entry.sandbox.clone())
    }

    /// The active sandbox, if any, with its access time bumped.
    pub async fn active(&self) -> Option<Arc<dyn SandboxProvider>> {
        let mut registry = self.registry.write().await;
        let id = registry.active_id.clone()?;
        let entry = registry.entries.get_mut(&id)?;
        entry.last_accessed = Utc::now();
        Some(entry.sandbox.clone())
    }

    pub async fn activate(&self, id: &str) -> Result<SandboxInfo, SandboxError> {
        let mut registry = self.registry.write().await;
        if !registry.entries.contains_key(id) {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        registry.active_id = Some(id.to_string());
        if let Some(entry) = registry.entries.get_mut(id) {
            entry.last_accessed = Utc::now();
        }
        info!(sandbox_id = %id, "Activated sandbox");
        registry
            .info(id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))
    }

    pub async fn info(&self, id: &str) -> Option<SandboxInfo> {
        self.registry.read().await.info(id)
    }

    pub async fn active_info(&self) -> Option<SandboxInfo> {
        let registry = self.registry.read().await;
        let id = registry.active_id.as_deref()?;
        registry.info(id)
    }

    /// All sandboxes, oldest first.
    pub async fn list(&self) -> Vec<SandboxInfo> {
        let registry = self.registry.read().await;
        let mut infos: Vec<SandboxInfo> = registry
            .entries
            .keys()
            .filter_map(|id| registry.info(id))
            .collect();
        infos.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sandbox_id.cmp(&b.sandbox_id))
        });
        infos
    }

    /// Remove the sandbox from the registry, then terminate it.
    pub async fn terminate(&self, id: &str) -> Result<(), SandboxError> {
        let entry = {
            let mut registry = self.registry.write().await;
            let entry = registry
                .entries
                .remove(id)
                .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
            if registry.active_id.as_deref() == Some(id) {
                registry.active_id = None;
            }
            entry
        };

        entry.sandbox.terminate().await?;
        info!(sandbox_id = %id, "Terminated sandbox");
        Ok(())
    }

    pub async fn terminate_all(&self) {
        let entries: Vec<(String, Entry)> = {
            let mut registry = self.registry.write().await;
            registry.active_id = None;
            registry.entries.drain().collect()
        };

        for (id, entry) in entries {
            if let Err(e) = entry.sandbox.terminate().await {
                warn!(sandbox_id = %id, error = %e, "Failed to terminate sandbox");
            }
        }
    }
}
