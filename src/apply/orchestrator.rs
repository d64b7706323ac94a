use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::morph::{apply_morph_edit, parse_morph_edits, PatchMerger};
use super::normalize::{is_protected_file, normalize_path, sanitize_content};
use super::parser::ParsedResponse;
use crate::sandbox::{self, SandboxError, SandboxProvider};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub files_created: Vec<String>,
    pub files_updated: Vec<String>,
    pub packages_installed: Vec<String>,
    pub packages_already_installed: Vec<String>,
    pub packages_failed: Vec<String>,
    pub commands_executed: Vec<String>,
    pub errors: Vec<String>,
}

/// Turns a parsed response into sandbox writes.
#[derive(Clone, Default)]
pub struct ApplyOrchestrator {
    merger: Option<Arc<dyn PatchMerger>>,
}

impl ApplyOrchestrator {
    pub fn new(merger: Option<Arc<dyn PatchMerger>>) -> Self {
        Self { merger }
    }

    pub fn patching_available(&self) -> bool {
        self.merger.is_some()
    }

    /// Patches first, then whole-file writes. Item failures land in
    /// `errors`; only a sandbox that cannot write at all fails the call.
    pub async fn apply(
        &self,
        sandbox: &dyn SandboxProvider,
        parsed: &ParsedResponse,
        edit_mode: bool,
        patching_enabled: bool,
        raw_response: &str,
    ) -> Result<ApplyResult, SandboxError> {
        if !sandbox.can_write() {
            return Err(SandboxError::WriteUnsupported);
        }

        let mut result = ApplyResult::default();
        let mut patched = HashSet::new();

        if let Some(merger) = self.merger.as_deref().filter(|_| edit_mode && patching_enabled) {
            for edit in parse_morph_edits(raw_response) {
                match apply_morph_edit(sandbox, merger, &edit).await {
                    Ok(path) => {
                        patched.insert(path.clone());
                        result.files_updated.push(path);
                    }
                    Err(e) => {
                        warn!(target = %edit.target_file, error = %e, "Morph apply failed");
                        result
                            .errors
                            .push(format!("Morph apply failed for {}: {}", edit.target_file, e));
                    }
                }
            }
        }

        for file in &parsed.files {
            if is_protected_file(&file.path) {
                info!(path = %file.path, "Skipping protected build file");
                continue;
            }

            let path = normalize_path(&file.path);
            if patched.contains(&path) {
                continue;
            }

            let content = sanitize_content(&path, &file.content);
            match sandbox::write_file(sandbox, &path, &content).await {
                Ok(()) => result.files_created.push(path),
                Err(e) => {
                    warn!(path = %file.path, error = %e, "File write failed");
                    result
                        .errors
                        .push(format!("Failed to create {}: {}", file.path, e));
                }
            }
        }

        info!(
            sandbox_id = sandbox.id(),
            created = result.files_created.len(),
            updated = result.files_updated.len(),
            errors = result.errors.len(),
            "Applied AI response"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::morph::AppendMerger;
    use crate::apply::parser::parse_response;
    use crate::sandbox::testing::{MockSandbox, WriteShape};

    const RESPONSE: &str = r#"<explanation>Adds a header</explanation>
<file path="components/Header.jsx">import './Header.css';
export default function Header() { return <h1>Hi</h1>; }</file>
<file path="package.json">{"name": "hijack"}</file>
<file path="src/index.css">.card { @apply shadow-4xl; }</file>
<package>left-pad</package>
<command>npm run lint</command>"#;

    fn orchestrator() -> ApplyOrchestrator {
        ApplyOrchestrator::new(None)
    }

    #[tokio::test]
    async fn test_apply_writes_normalized_sanitized_files() {
        let sandbox = MockSandbox::new();
        let parsed = parse_response(RESPONSE).unwrap();

        let result = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap();

        assert_eq!(
            result.files_created,
            vec!["src/components/Header.jsx", "src/index.css"]
        );
        assert!(result.errors.is_empty());
        assert_eq!(
            sandbox.file("src/components/Header.jsx").as_deref(),
            Some("export default function Header() { return <h1>Hi</h1>; }")
        );
        assert_eq!(
            sandbox.file("src/index.css").as_deref(),
            Some(".card { @apply shadow-2xl; }")
        );
        assert!(sandbox.file("package.json").is_none());
        assert!(result.packages_installed.is_empty());
        assert!(result.commands_executed.is_empty());
        assert!(sandbox.installs().is_empty());
        assert!(sandbox.commands().is_empty());
    }

    #[tokio::test]
    async fn test_apply_through_file_store() {
        let sandbox = MockSandbox::with_write_shape(WriteShape::Store);
        let parsed = parse_response(RESPONSE).unwrap();

        let result = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap();

        assert_eq!(result.files_created.len(), 2);
        assert_eq!(
            sandbox.store_writes(),
            vec![
                "/home/user/app/src/components/Header.jsx".to_string(),
                "/home/user/app/src/index.css".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded_and_loop_continues() {
        let sandbox = MockSandbox::new().failing_write("src/components/Header.jsx");
        let parsed = parse_response(RESPONSE).unwrap();

        let result = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap();

        assert_eq!(result.files_created, vec!["src/index.css"]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Failed to create components/Header.jsx:"));
    }

    #[tokio::test]
    async fn test_write_unsupported_fails_before_side_effects() {
        let sandbox = MockSandbox::with_write_shape(WriteShape::None);
        let parsed = parse_response(RESPONSE).unwrap();

        let err = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::WriteUnsupported));
        assert_eq!(sandbox.file_count(), 0);
    }

    #[tokio::test]
    async fn test_patched_paths_are_not_rewritten_whole() {
        let raw = r#"<edit target_file="App.jsx"><instructions>add footer</instructions><update><footer /></update></edit>
<edit target_file="src/Missing.jsx"><update>x</update></edit>
<file path="src/App.jsx">export default function App() { return null; }</file>
<file path="src/main.jsx">import App from './App';</file>"#;
        let sandbox = MockSandbox::new().with_file("src/App.jsx", "<App />");
        let parsed = parse_response(raw).unwrap();
        let orchestrator = ApplyOrchestrator::new(Some(Arc::new(AppendMerger { fail_for: None })));

        let result = orchestrator
            .apply(&sandbox, &parsed, true, true, raw)
            .await
            .unwrap();

        assert_eq!(result.files_updated, vec!["src/App.jsx"]);
        assert_eq!(result.files_created, vec!["src/main.jsx"]);
        assert_eq!(sandbox.file("src/App.jsx").as_deref(), Some("<App />\n<footer />"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Morph apply failed for src/Missing.jsx:"));
    }

    #[tokio::test]
    async fn test_edits_ignored_outside_edit_mode() {
        let raw = r#"<edit target_file="src/App.jsx"><update>x</update></edit>"#;
        let sandbox = MockSandbox::new().with_file("src/App.jsx", "old");
        let parsed = parse_response(raw).unwrap();
        let orchestrator = ApplyOrchestrator::new(Some(Arc::new(AppendMerger { fail_for: None })));

        let result = orchestrator
            .apply(&sandbox, &parsed, false, true, raw)
            .await
            .unwrap();

        assert!(result.files_updated.is_empty());
        assert_eq!(sandbox.file("src/App.jsx").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_reapplying_gives_same_state() {
        let sandbox = MockSandbox::new();
        let parsed = parse_response(RESPONSE).unwrap();

        let first = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap();
        let snapshot = sandbox.file("src/components/Header.jsx");
        let second = orchestrator()
            .apply(&sandbox, &parsed, false, false, RESPONSE)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(sandbox.file("src/components/Header.jsx"), snapshot);
        assert_eq!(sandbox.file_count(), 2);
    }
}
