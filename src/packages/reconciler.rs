use tracing::{error, info, warn};

use super::events::{classify_install_line, EventEmitter, InstallEvent, OutputStream};
use super::{normalize_packages, plan_install, InstallError, PackageManifest, MANIFEST_PATH};
use crate::sandbox::SandboxProvider;
use crate::shared::config::PackageConfig;

/// What a finished install request did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    pub installed: Vec<String>,
    pub already_installed: Vec<String>,
    pub failed: Vec<String>,
    pub restarted: bool,
}

/// Installs the packages a sandbox is missing, cycling its dev server around
/// the install and streaming progress to an [`EventEmitter`].
#[derive(Debug, Clone)]
pub struct PackageReconciler {
    settings: PackageConfig,
}

impl PackageReconciler {
    pub fn new(settings: PackageConfig) -> Self {
        Self { settings }
    }

    pub fn event_channel(&self) -> (EventEmitter, tokio::sync::mpsc::Receiver<InstallEvent>) {
        EventEmitter::channel(self.settings.event_buffer, self.settings.event_send_timeout())
    }

    /// Run one install request to completion.
    ///
    /// The emitter is closed on every path. A failure of the install primitive
    /// itself is emitted as a terminal `error` event and returned.
    pub async fn run(
        &self,
        sandbox: &dyn SandboxProvider,
        requested: &[String],
        emitter: &mut EventEmitter,
    ) -> Result<InstallOutcome, InstallError> {
        let result = self.reconcile(sandbox, requested, emitter).await;
        if let Err(e) = &result {
            error!(sandbox_id = sandbox.id(), error = %e, "Package installation failed");
            emitter.emit(InstallEvent::error(e.to_string())).await;
        }
        emitter.close();
        result
    }

    async fn reconcile(
        &self,
        sandbox: &dyn SandboxProvider,
        requested: &[String],
        emitter: &mut EventEmitter,
    ) -> Result<InstallOutcome, InstallError> {
        let packages = normalize_packages(requested);
        if packages.is_empty() {
            return Err(InstallError::NoPackages);
        }

        info!(sandbox_id = sandbox.id(), packages = ?packages, "Installing packages");
        emitter
            .emit(InstallEvent::Start {
                message: format!(
                    "Installing {} package{}...",
                    packages.len(),
                    if packages.len() > 1 { "s" } else { "" }
                ),
                packages: packages.clone(),
            })
            .await;

        self.stop_dev_server(sandbox, emitter).await;

        emitter
            .emit(InstallEvent::status("Checking installed packages..."))
            .await;
        let manifest = self.read_manifest(sandbox).await;
        let plan = plan_install(&packages, manifest.as_ref());

        let mut outcome = InstallOutcome {
            already_installed: plan.already_installed.clone(),
            ..InstallOutcome::default()
        };

        if !plan.already_installed.is_empty() {
            emitter
                .emit(InstallEvent::info(format!(
                    "Already installed: {}",
                    plan.already_installed.join(", ")
                )))
                .await;
        }

        if plan.to_install.is_empty() {
            emitter
                .emit(InstallEvent::Success {
                    message: "All packages are already installed".to_string(),
                    installed_packages: Vec::new(),
                    already_installed: packages.clone(),
                })
                .await;
            outcome.restarted = self
                .restart_dev_server(sandbox, emitter, "Dev server restarted!", &[])
                .await;
            return Ok(outcome);
        }

        emitter
            .emit(InstallEvent::info(format!(
                "Installing {} new package(s): {}",
                plan.to_install.len(),
                plan.to_install.join(", ")
            )))
            .await;

        let output = sandbox.install_packages(&plan.to_install).await?;

        for line in output.stdout.lines() {
            if let Some(event) = classify_install_line(OutputStream::Stdout, line) {
                emitter.emit(event).await;
            }
        }
        for line in output.stderr.lines() {
            if let Some(event) = classify_install_line(OutputStream::Stderr, line) {
                emitter.emit(event).await;
            }
        }

        if output.success() {
            info!(packages = ?plan.to_install, "Packages installed successfully");
            emitter
                .emit(InstallEvent::Success {
                    message: format!("Successfully installed: {}", plan.to_install.join(", ")),
                    installed_packages: plan.to_install.clone(),
                    already_installed: Vec::new(),
                })
                .await;
            outcome.installed = plan.to_install;
        } else {
            warn!(
                packages = ?plan.to_install,
                exit_code = output.exit_code,
                "Package installer exited with failure"
            );
            emitter
                .emit(InstallEvent::error("Package installation failed"))
                .await;
            outcome.failed = plan.to_install;
        }

        outcome.restarted = self
            .restart_dev_server(
                sandbox,
                emitter,
                "Package installation complete and dev server restarted!",
                &outcome.installed,
            )
            .await;
        Ok(outcome)
    }

    async fn stop_dev_server(&self, sandbox: &dyn SandboxProvider, emitter: &mut EventEmitter) {
        emitter
            .emit(InstallEvent::status("Stopping development server..."))
            .await;

        match sandbox
            .stop_dev_server(&self.settings.dev_server_stop_command)
            .await
        {
            Ok(output) if !output.success() => {
                info!(exit_code = output.exit_code, "Dev server stop command found nothing to stop");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to stop dev server"),
        }

        tokio::time::sleep(self.settings.stop_grace()).await;
    }

    async fn read_manifest(&self, sandbox: &dyn SandboxProvider) -> Option<PackageManifest> {
        let raw = match sandbox.read_file(MANIFEST_PATH).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Could not read package manifest; installing all packages");
                return None;
            }
        };

        match PackageManifest::parse(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(error = %e, "Could not parse package manifest; installing all packages");
                None
            }
        }
    }

    /// Returns whether the dev server came back.
    async fn restart_dev_server(
        &self,
        sandbox: &dyn SandboxProvider,
        emitter: &mut EventEmitter,
        complete_message: &str,
        installed: &[String],
    ) -> bool {
        emitter
            .emit(InstallEvent::status("Restarting development server..."))
            .await;

        if let Err(e) = sandbox.restart_dev_server().await {
            error!(error = %e, "Failed to restart dev server after installation");
            emitter
                .emit(InstallEvent::error(format!("Failed to restart dev server: {e}")))
                .await;
            return false;
        }

        tokio::time::sleep(self.settings.restart_settle()).await;
        emitter
            .emit(InstallEvent::Complete {
                message: complete_message.to_string(),
                installed_packages: installed.to_vec(),
            })
            .await;
        true
    }
}
