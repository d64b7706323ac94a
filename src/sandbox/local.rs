use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::manager::SandboxFactory;
use super::{CommandOutput, FileWriter, SandboxError, SandboxProvider};
use crate::shared::config::SandboxConfig;

const PROVIDER_NAME: &str = "local";

/// Project directory on the host, driven through `bash -c`.
pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    config: SandboxConfig,
    dev_server: Mutex<Option<Child>>,
    terminated: AtomicBool,
}

impl LocalSandbox {
    pub async fn create(id: &str, config: &SandboxConfig) -> Result<Self, SandboxError> {
        let root = config.root_dir.join(id);
        fs::create_dir_all(&root).await?;
        info!(sandbox_id = %id, root = %root.display(), "Created local sandbox");
        Ok(Self {
            id: id.to_string(),
            root,
            config: config.clone(),
            dev_server: Mutex::new(None),
            terminated: AtomicBool::new(false),
        })
    }

    fn ensure_live(&self) -> Result<(), SandboxError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(SandboxError::Terminated(self.id.clone()));
        }
        Ok(())
    }

    /// Map a project-relative path into the sandbox root. A leading `/` is
    /// ignored; `..` may not climb above the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = path.trim_start_matches('/');
        let mut full = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(segment) => {
                    full.push(segment);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(SandboxError::InvalidPath(path.to_string()));
                    }
                    full.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(path.to_string()));
                }
            }
        }
        if depth == 0 {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(full)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.ensure_live()?;
        let started = Instant::now();
        info!(sandbox_id = %self.id, %command, "command start");

        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let timeout = Duration::from_secs(self.config.command_timeout_secs);
        let out = tokio::time::timeout(timeout, child).await.map_err(|_| {
            SandboxError::Command(format!(
                "'{}' timed out after {}s",
                command, self.config.command_timeout_secs
            ))
        })??;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code().unwrap_or(-1),
        };
        info!(
            sandbox_id = %self.id,
            %command,
            exit = output.exit_code,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            took_ms = started.elapsed().as_millis() as u64,
            "command end"
        );
        Ok(output)
    }

    /// Kill the dev server's whole process group. Returns whether one was running.
    async fn kill_dev_server(&self) -> bool {
        let Some(mut child) = self.dev_server.lock().await.take() else {
            return false;
        };

        // The server runs as a grandchild of bash, so the leader alone is not enough
        if let Some(pid) = child.id() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(sandbox_id = %self.id, error = %e, "Failed to signal dev server group"),
            }
        }
        if let Err(e) = child.kill().await {
            warn!(sandbox_id = %self.id, error = %e, "Failed to reap dev server");
        }
        info!(sandbox_id = %self.id, "Dev server stopped");
        true
    }
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[async_trait]
impl FileWriter for LocalSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_live()?;
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, content).await?;
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_live()?;
        let full = self.resolve(path)?;
        match fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn file_writer(&self) -> Option<&dyn FileWriter> {
        Some(self as &dyn FileWriter)
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.exec(command).await
    }

    async fn install_packages(&self, packages: &[String]) -> Result<CommandOutput, SandboxError> {
        if packages.is_empty() {
            return Ok(CommandOutput::default());
        }
        let names: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        let command = format!("{} {}", self.config.install_command, names.join(" "));
        self.exec(&command).await
    }

    /// Stops only this sandbox's server; the shared stop command is never run on the host.
    async fn stop_dev_server(&self, _stop_command: &str) -> Result<CommandOutput, SandboxError> {
        self.ensure_live()?;
        let exit_code = if self.kill_dev_server().await { 0 } else { 1 };
        Ok(CommandOutput {
            exit_code,
            ..CommandOutput::default()
        })
    }

    async fn restart_dev_server(&self) -> Result<(), SandboxError> {
        self.ensure_live()?;
        self.kill_dev_server().await;

        let child = Command::new("bash")
            .arg("-c")
            .arg(&self.config.dev_server_command)
            .current_dir(&self.root)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Command(format!("failed to start dev server: {e}")))?;

        info!(sandbox_id = %self.id, pid = child.id(), "Dev server started");
        *self.dev_server.lock().await = Some(child);
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.kill_dev_server().await;
        info!(sandbox_id = %self.id, "Terminated local sandbox");
        Ok(())
    }
}

/// Creates [`LocalSandbox`]es under the configured root directory.
pub struct LocalSandboxFactory {
    config: SandboxConfig,
}

impl LocalSandboxFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SandboxFactory for LocalSandboxFactory {
    async fn create(&self, id: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError> {
        let sandbox = LocalSandbox::create(id, &self.config).await?;
        Ok(Arc::new(sandbox))
    }
}
