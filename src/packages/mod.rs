// Package reconciliation against the sandbox manifest
pub mod events;
pub mod reconciler;

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::sandbox::SandboxError;

pub use events::InstallEvent;
pub use reconciler::PackageReconciler;

pub const MANIFEST_PATH: &str = "package.json";

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("No valid package names provided")]
    NoPackages,

    #[error("Package install failed: {0}")]
    Upstream(#[from] SandboxError),
}

/// Trim, drop blanks and de-duplicate keeping first occurrence.
pub fn normalize_packages<S: AsRef<str>>(requested: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .filter(|p| seen.insert(p.to_string()))
        .map(str::to_string)
        .collect()
}

/// Bare package name without a version suffix.
///
/// `@scope/name@1.2` yields `@scope/name`, `name@^1` yields `name`.
pub fn package_name(package: &str) -> &str {
    let package = package.trim();
    if let Some(scoped) = package.strip_prefix('@') {
        match scoped.find('@') {
            Some(idx) => &package[..idx + 1],
            None => package,
        }
    } else {
        package.split('@').next().unwrap_or(package)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, Value>,
}

impl PackageManifest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

/// Requested packages split by whether the manifest already declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    pub already_installed: Vec<String>,
    pub to_install: Vec<String>,
}

/// Without a manifest every package needs installing.
pub fn plan_install(requested: &[String], manifest: Option<&PackageManifest>) -> InstallPlan {
    let mut plan = InstallPlan::default();
    for package in requested {
        let satisfied = manifest.is_some_and(|m| m.contains(package_name(package)));
        if satisfied {
            plan.already_installed.push(package.clone());
        } else {
            plan.to_install.push(package.clone());
        }
    }
    plan
}
