use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::normalize::normalize_path;
use super::parser::{scan, Section};
use crate::sandbox::{self, SandboxError, SandboxProvider};
use crate::shared::config::MorphConfig;

/// Instruction-plus-snippet edit aimed at a file that already exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MorphEdit {
    pub target_file: String,
    pub instructions: String,
    pub update: String,
}

#[derive(Error, Debug)]
pub enum MorphApplyError {
    #[error("could not read {path}: {source}")]
    Read { path: String, source: SandboxError },

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("merge returned empty content")]
    EmptyMerge,

    #[error("could not write {path}: {source}")]
    Write { path: String, source: SandboxError },
}

/// Merges an update snippet into the current content of a file.
#[async_trait]
pub trait PatchMerger: Send + Sync {
    async fn merge(&self, instructions: &str, original: &str, update: &str) -> Result<String>;
}

/// Collect `<edit target_file="...">` blocks in the order they appear.
///
/// Blocks without an `<update>` or without a closing `</edit>` are skipped.
pub fn parse_morph_edits(text: &str) -> Vec<MorphEdit> {
    scan(text)
        .into_iter()
        .filter_map(|section| match section {
            Section::Edit { target, body } => {
                let update = inner_block(body, "update")?.trim_matches('\n');
                if update.trim().is_empty() {
                    return None;
                }
                Some(MorphEdit {
                    target_file: target,
                    instructions: inner_block(body, "instructions")
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default(),
                    update: update.to_string(),
                })
            }
            _ => None,
        })
        .collect()
}

fn inner_block<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(open.as_str())? + open.len();
    let len = body[start..].find(close.as_str())?;
    Some(&body[start..start + len])
}

/// Apply one edit: read the normalized target, merge, write back.
/// Returns the normalized path that was updated.
pub async fn apply_morph_edit(
    sandbox: &dyn SandboxProvider,
    merger: &dyn PatchMerger,
    edit: &MorphEdit,
) -> Result<String, MorphApplyError> {
    let path = normalize_path(&edit.target_file);

    let original = sandbox
        .read_file(&path)
        .await
        .map_err(|source| MorphApplyError::Read {
            path: path.clone(),
            source,
        })?;

    let merged = merger
        .merge(&edit.instructions, &original, &edit.update)
        .await
        .map_err(|e| MorphApplyError::Merge(e.to_string()))?;
    if merged.trim().is_empty() {
        return Err(MorphApplyError::EmptyMerge);
    }

    sandbox::write_file(sandbox, &path, &merged)
        .await
        .map_err(|source| MorphApplyError::Write {
            path: path.clone(),
            source,
        })?;

    debug!(path = %path, original_len = original.len(), merged_len = merged.len(), "Merged edit");
    Ok(path)
}

/// Chat-completions client for the Morph fast-apply model.
#[derive(Clone)]
pub struct MorphClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl MorphClient {
    /// `None` when no API key is configured; patching is then unavailable.
    pub fn from_config(config: &MorphConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            info!("MORPH_API_KEY not set; fine-grained edits disabled");
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create morph client: {}", e))?;

        info!(url = %config.api_url, model = %config.model, "Fine-grained edits enabled");
        Ok(Some(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        }))
    }
}

#[async_trait]
impl PatchMerger for MorphClient {
    async fn merge(&self, instructions: &str, original: &str, update: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: merge_prompt(instructions, original, update),
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("morph API returned {}: {}", status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("morph API returned no content"))?;

        Ok(strip_code_fence(&content).to_string())
    }
}

fn merge_prompt(instructions: &str, original: &str, update: &str) -> String {
    format!("<instruction>{instructions}</instruction>\n<code>{original}</code>\n<update>{update}</update>")
}

/// Drop a surrounding Markdown fence if the model wrapped its answer in one.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return content;
    };
    let Some(body_start) = rest.find('\n') else {
        return content;
    };
    let body = &rest[body_start + 1..];
    body.strip_suffix("```").map(str::trim_end).unwrap_or(body)
}

/// Test merger that appends the update to the original content.
#[cfg(test)]
pub(crate) struct AppendMerger {
    pub fail_for: Option<String>,
}

#[cfg(test)]
#[async_trait]
impl PatchMerger for AppendMerger {
    async fn merge(&self, _instructions: &str, original: &str, update: &str) -> Result<String> {
        if self.fail_for.as_deref() == Some(original) {
            anyhow::bail!("upstream 503");
        }
        Ok(format!("{original}\n{update}"))
    }
}
