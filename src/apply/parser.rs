use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::reconcile::FileSelector;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed AI response format: package list entry '{entry}' contains markup")]
    MalformedPackages { entry: String },
}

/// Whole-file content extracted for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCandidate {
    pub path: String,
    pub content: String,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    pub explanation: String,
    pub template: String,
    pub files: Vec<FileCandidate>,
    pub packages: Vec<String>,
    pub commands: Vec<String>,
    pub structure: Option<String>,
}

/// A span of the response owned by exactly one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Section<'a> {
    File {
        path: String,
        body: &'a str,
        complete: bool,
    },
    Command(&'a str),
    Package(&'a str),
    PackageList(&'a str),
    Explanation(&'a str),
    Structure(&'a str),
    Template(&'a str),
    Edit {
        target: String,
        body: &'a str,
    },
}

struct OpenTag {
    attrs: Vec<(String, String)>,
    header_len: usize,
}

impl OpenTag {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

const FILE_CLOSE: &str = "</file>";
const EDIT_CLOSE: &str = "</edit>";

/// Split the raw response into owned sections in a single left-to-right pass.
///
/// Text between recognised tags is ignored, and nothing inside a claimed span
/// is scanned again, so a `<command>` inside a file body stays file content.
pub(crate) fn scan(text: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('<') {
        let start = pos + offset;
        let rest = &text[start..];

        if let Some(tag) = parse_open_tag(rest, "file") {
            let Some(path) = tag.attr("path").filter(|p| !p.is_empty()) else {
                pos = start + 1;
                continue;
            };
            let body_start = start + tag.header_len;
            let body_rest = &text[body_start..];
            let close = body_rest.find(FILE_CLOSE);
            let next_open = find_open(body_rest, "file");

            let (body_len, complete, next_pos) = match (close, next_open) {
                (Some(c), Some(n)) if n < c => (n, false, body_start + n),
                (Some(c), _) => (c, true, body_start + c + FILE_CLOSE.len()),
                (None, Some(n)) => (n, false, body_start + n),
                (None, None) => (body_rest.len(), false, text.len()),
            };

            sections.push(Section::File {
                path: path.to_string(),
                body: &body_rest[..body_len],
                complete,
            });
            pos = next_pos;
            continue;
        }

        if let Some(tag) = parse_open_tag(rest, "edit") {
            let body_start = start + tag.header_len;
            let body_rest = &text[body_start..];
            match body_rest.find(EDIT_CLOSE) {
                Some(close) => {
                    if let Some(target) = tag.attr("target_file").filter(|t| !t.is_empty()) {
                        sections.push(Section::Edit {
                            target: target.to_string(),
                            body: &body_rest[..close],
                        });
                    }
                    pos = body_start + close + EDIT_CLOSE.len();
                }
                None => {
                    // Only the header is dropped; later tags are still scanned
                    debug!(offset = start, "Dropping unterminated edit block");
                    pos = body_start;
                }
            }
            continue;
        }

        let claimed = single_line(rest, "command")
            .map(|(body, len)| (Section::Command(body), len))
            .or_else(|| block(rest, "packages").map(|(body, len)| (Section::PackageList(body), len)))
            .or_else(|| single_line(rest, "package").map(|(body, len)| (Section::Package(body), len)))
            .or_else(|| block(rest, "explanation").map(|(body, len)| (Section::Explanation(body), len)))
            .or_else(|| block(rest, "structure").map(|(body, len)| (Section::Structure(body), len)))
            .or_else(|| single_line(rest, "template").map(|(body, len)| (Section::Template(body), len)));

        match claimed {
            Some((section, len)) => {
                sections.push(section);
                pos = start + len;
            }
            None => pos = start + 1,
        }
    }

    sections
}

/// Decompose a model response into files, packages, commands and prose.
///
/// Never panics; the only failure is a structurally broken package list, so an
/// empty result always means the response asked for nothing.
pub fn parse_response(text: &str) -> Result<ParsedResponse, ParseError> {
    debug!(len = text.len(), "Starting AI response parsing");

    let mut selector = FileSelector::default();
    let mut parsed = ParsedResponse::default();
    let mut block_packages = Vec::new();
    let mut explanation = None;
    let mut template = None;

    for section in scan(text) {
        match section {
            Section::File {
                path,
                body,
                complete,
            } => {
                selector.offer(&path, body.trim(), complete);
            }
            Section::Command(command) => push_trimmed(&mut parsed.commands, command),
            Section::Package(package) => push_trimmed(&mut parsed.packages, package),
            Section::PackageList(list) => block_packages.extend(split_package_list(list)?),
            Section::Explanation(body) => {
                explanation.get_or_insert_with(|| body.trim().to_string());
            }
            Section::Structure(body) => {
                parsed.structure.get_or_insert_with(|| body.trim().to_string());
            }
            Section::Template(body) => {
                template.get_or_insert_with(|| body.trim().to_string());
            }
            Section::Edit { .. } => {}
        }
    }

    parsed.files = selector.into_files();
    parsed.packages.extend(block_packages);
    parsed.explanation = explanation.unwrap_or_default();
    parsed.template = template.unwrap_or_default();

    info!(
        file_count = parsed.files.len(),
        package_count = parsed.packages.len(),
        command_count = parsed.commands.len(),
        "Successfully parsed AI response"
    );
    Ok(parsed)
}

fn push_trimmed(target: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        target.push(value.to_string());
    }
}

fn split_package_list(list: &str) -> Result<Vec<String>, ParseError> {
    let mut packages = Vec::new();
    for entry in list.split([',', '\n']) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.contains(['<', '>']) {
            return Err(ParseError::MalformedPackages {
                entry: entry.to_string(),
            });
        }
        packages.push(entry.to_string());
    }
    Ok(packages)
}

/// Parse `<name attr="v" ...>` at the start of `rest`. Returns `None` for
/// anything that is not a complete opening tag, including self-closing ones.
fn parse_open_tag(rest: &str, name: &str) -> Option<OpenTag> {
    let after_name = rest.strip_prefix('<')?.strip_prefix(name)?;
    let first = after_name.chars().next()?;
    if !(first.is_whitespace() || first == '>') {
        return None;
    }

    let base = rest.len() - after_name.len();
    let bytes = after_name.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match *bytes.get(i)? {
            b'>' => {
                return Some(OpenTag {
                    attrs,
                    header_len: base + i + 1,
                })
            }
            b'/' | b'=' | b'<' => return None,
            _ => {}
        }

        let key_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/' | b'<')
        {
            i += 1;
        }
        let key = after_name[key_start..i].to_string();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            attrs.push((key, String::new()));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let quote = *bytes.get(i)?;
        if quote != b'"' && quote != b'\'' {
            return None;
        }
        let value_start = i + 1;
        let value_len = after_name[value_start..].find(quote as char)?;
        attrs.push((
            key,
            after_name[value_start..value_start + value_len].to_string(),
        ));
        i = value_start + value_len + 1;
    }
}

/// Offset of the next `<name` opening in `haystack`, header complete or not.
fn find_open(haystack: &str, name: &str) -> Option<usize> {
    let needle = format!("<{name}");
    let mut from = 0;
    while let Some(idx) = haystack[from..].find(&needle) {
        let at = from + idx;
        let boundary = haystack[at + needle.len()..].chars().next();
        if matches!(boundary, Some(c) if c.is_whitespace() || c == '>') {
            return Some(at);
        }
        from = at + needle.len();
    }
    None
}

/// `<name>body</name>` with the closing tag on the same line.
fn single_line<'a>(rest: &'a str, name: &str) -> Option<(&'a str, usize)> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let after = rest.strip_prefix(open.as_str())?;
    let line_end = after.find('\n').unwrap_or(after.len());
    let body_len = after[..line_end].find(close.as_str())?;
    Some((&after[..body_len], open.len() + body_len + close.len()))
}

/// `<name>body</name>` spanning any number of lines; requires the closing tag.
fn block<'a>(rest: &'a str, name: &str) -> Option<(&'a str, usize)> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let after = rest.strip_prefix(open.as_str())?;
    let body_len = after.find(close.as_str())?;
    Some((&after[..body_len], open.len() + body_len + close.len()))
}
