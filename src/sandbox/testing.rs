use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandOutput, FileStore, FileWriter, SandboxError, SandboxProvider};

const MOCK_APP_ROOT: &str = "/home/user/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteShape {
    Writer,
    Store,
    None,
}

/// Scripted in-memory sandbox used by the pipeline tests.
pub struct MockSandbox {
    write_shape: WriteShape,
    files: Mutex<HashMap<String, String>>,
    failing_writes: HashSet<String>,
    store_writes: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    fail_commands: bool,
    install_result: Mutex<Option<Result<CommandOutput, String>>>,
    installs: Mutex<Vec<Vec<String>>>,
    restarts: AtomicUsize,
    fail_restart: bool,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::with_write_shape(WriteShape::Writer)
    }

    pub fn with_write_shape(write_shape: WriteShape) -> Self {
        Self {
            write_shape,
            files: Mutex::new(HashMap::new()),
            failing_writes: HashSet::new(),
            store_writes: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            fail_commands: false,
            install_result: Mutex::new(None),
            installs: Mutex::new(Vec::new()),
            restarts: AtomicUsize::new(0),
            fail_restart: false,
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn failing_write(mut self, path: &str) -> Self {
        self.failing_writes.insert(path.to_string());
        self
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn failing_restart(mut self) -> Self {
        self.fail_restart = true;
        self
    }

    pub fn install_returns(self, stdout: &str, stderr: &str, exit_code: i32) -> Self {
        *self.install_result.lock().unwrap() = Some(Ok(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }));
        self
    }

    pub fn install_errors(self, message: &str) -> Self {
        *self.install_result.lock().unwrap() = Some(Err(message.to_string()));
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn store_writes(&self) -> Vec<String> {
        self.store_writes.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn installs(&self) -> Vec<Vec<String>> {
        self.installs.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    fn store(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        if self.failing_writes.contains(path) {
            return Err(SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file",
            )));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }
}

#[async_trait]
impl FileWriter for MockSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.store(path, content)
    }
}

#[async_trait]
impl FileStore for MockSandbox {
    fn app_root(&self) -> &str {
        MOCK_APP_ROOT
    }

    async fn write(&self, absolute_path: &str, content: &str) -> Result<(), SandboxError> {
        self.store_writes
            .lock()
            .unwrap()
            .push(absolute_path.to_string());
        let relative = absolute_path
            .strip_prefix(MOCK_APP_ROOT)
            .unwrap_or(absolute_path)
            .trim_start_matches('/');
        self.store(relative, content)
    }
}

#[async_trait]
impl SandboxProvider for MockSandbox {
    fn id(&self) -> &str {
        "mock"
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.file(path)
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }

    fn file_writer(&self) -> Option<&dyn FileWriter> {
        match self.write_shape {
            WriteShape::Writer => Some(self as &dyn FileWriter),
            _ => None,
        }
    }

    fn file_store(&self) -> Option<&dyn FileStore> {
        match self.write_shape {
            WriteShape::Store => Some(self as &dyn FileStore),
            _ => None,
        }
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.commands.lock().unwrap().push(command.to_string());
        if self.fail_commands {
            return Err(SandboxError::Command(format!("{command}: no process found")));
        }
        Ok(CommandOutput::default())
    }

    async fn install_packages(&self, packages: &[String]) -> Result<CommandOutput, SandboxError> {
        self.installs.lock().unwrap().push(packages.to_vec());
        match self.install_result.lock().unwrap().clone() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(SandboxError::Command(message)),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn restart_dev_server(&self) -> Result<(), SandboxError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.fail_restart {
            return Err(SandboxError::Command("vite exited with code 1".to_string()));
        }
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}
