// Sandbox collaborator interface, local provider and lifecycle manager
pub mod local;
pub mod manager;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox provider does not support file writes")]
    WriteUnsupported,

    #[error("Sandbox {0} has been terminated")]
    Terminated(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Invalid sandbox path: {0}")]
    InvalidPath(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a command run inside a sandbox.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Write primitive addressed by project-relative path.
#[async_trait]
pub trait FileWriter: Send + Sync {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;
}

/// Structured file store addressed by absolute path under `app_root`.
#[async_trait]
pub trait FileStore: Send + Sync {
    fn app_root(&self) -> &str;
    async fn write(&self, absolute_path: &str, content: &str) -> Result<(), SandboxError>;
}

/// Capability set every sandbox backend exposes to the apply and install pipelines.
///
/// A provider offers at least one of the two write shapes; callers go through
/// [`write_file`] so they never depend on which one it is.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn id(&self) -> &str;

    fn provider_name(&self) -> &str;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    fn file_writer(&self) -> Option<&dyn FileWriter> {
        None
    }

    fn file_store(&self) -> Option<&dyn FileStore> {
        None
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError>;

    async fn install_packages(&self, packages: &[String]) -> Result<CommandOutput, SandboxError>;

    /// Stop the project's dev server. Backends without their own handle on the
    /// server run `stop_command` inside the sandbox.
    async fn stop_dev_server(&self, stop_command: &str) -> Result<CommandOutput, SandboxError> {
        self.run_command(stop_command).await
    }

    async fn restart_dev_server(&self) -> Result<(), SandboxError>;

    async fn terminate(&self) -> Result<(), SandboxError>;

    fn can_write(&self) -> bool {
        self.file_writer().is_some() || self.file_store().is_some()
    }
}

/// Write `content` to the project-relative `path` through whichever write shape
/// the provider exposes.
pub async fn write_file(
    sandbox: &dyn SandboxProvider,
    path: &str,
    content: &str,
) -> Result<(), SandboxError> {
    if let Some(writer) = sandbox.file_writer() {
        return writer.write_file(path, content).await;
    }
    if let Some(store) = sandbox.file_store() {
        let absolute = format!(
            "{}/{}",
            store.app_root().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        return store.write(&absolute, content).await;
    }
    Err(SandboxError::WriteUnsupported)
}

#[cfg(test)]
mod tests {
    use super::testing::{MockSandbox, WriteShape};
    use super::*;

    #[tokio::test]
    async fn test_write_through_file_writer() {
        let sandbox = MockSandbox::new();
        write_file(&sandbox, "src/App.tsx", "x").await.unwrap();
        assert_eq!(sandbox.file("src/App.tsx").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_write_through_file_store_uses_app_root() {
        let sandbox = MockSandbox::with_write_shape(WriteShape::Store);
        write_file(&sandbox, "/src/App.tsx", "x").await.unwrap();
        assert_eq!(sandbox.store_writes(), vec!["/home/user/app/src/App.tsx".to_string()]);
        assert_eq!(sandbox.file("src/App.tsx").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_write_without_capability() {
        let sandbox = MockSandbox::with_write_shape(WriteShape::None);
        assert!(!sandbox.can_write());
        let err = write_file(&sandbox, "src/App.tsx", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::WriteUnsupported));
    }
}
