use std::collections::HashMap;

use tracing::debug;

use super::parser::FileCandidate;

/// What happened to a candidate offered to the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Inserted,
    Replaced,
    Kept,
}

struct Slot {
    candidate: FileCandidate,
    truncated: bool,
}

/// Keeps exactly one candidate per path while a response is scanned.
///
/// Streaming responses re-emit growing prefixes of the same file, so the
/// selector prefers complete content over partial content and longer content
/// over shorter content. A shorter candidate never displaces a longer one, and
/// content carrying an elision marker never displaces content without one.
#[derive(Default)]
pub struct FileSelector {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl FileSelector {
    pub fn offer(&mut self, path: &str, content: &str, complete: bool) -> Selection {
        let truncated = has_elision_marker(content);
        let candidate = FileCandidate {
            path: path.to_string(),
            content: content.to_string(),
            is_complete: complete,
        };

        let Some(&slot_idx) = self.index.get(path) else {
            self.index.insert(path.to_string(), self.slots.len());
            self.slots.push(Slot {
                candidate,
                truncated,
            });
            return Selection::Inserted;
        };

        let slot = &mut self.slots[slot_idx];
        if !should_replace(slot, &candidate, truncated) {
            debug!(
                path,
                kept_len = slot.candidate.content.len(),
                offered_len = candidate.content.len(),
                "Keeping previously selected file candidate"
            );
            return Selection::Kept;
        }

        *slot = Slot {
            candidate,
            truncated,
        };
        Selection::Replaced
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Surviving candidates in first-seen path order.
    pub fn into_files(self) -> Vec<FileCandidate> {
        self.slots.into_iter().map(|slot| slot.candidate).collect()
    }
}

fn should_replace(existing: &Slot, offered: &FileCandidate, offered_truncated: bool) -> bool {
    if offered_truncated && !existing.truncated {
        return false;
    }

    let existing_len = existing.candidate.content.len();
    let offered_len = offered.content.len();
    if offered_len < existing_len {
        return false;
    }

    match (existing.candidate.is_complete, offered.is_complete) {
        (false, true) => true,
        (true, true) | (false, false) => offered_len > existing_len,
        (true, false) => false,
    }
}

/// True when `content` contains a `...` that stands for elided code rather
/// than spread/rest syntax (`...props`, `...[a]`) or prose (`Loading...`).
pub fn has_elision_marker(content: &str) -> bool {
    let mut from = 0;
    while let Some(idx) = content[from..].find("...") {
        let at = from + idx;
        let before = content[..at].chars().next_back();
        let after = content[at + 3..].chars().next();
        from = at + 3;

        let spread = matches!(
            after,
            Some(c) if c.is_alphanumeric() || matches!(c, '_' | '$' | '[' | '{' | '(' | '.')
        );
        let prose = matches!(before, Some(c) if c.is_alphanumeric() || c == '.');
        if !spread && !prose {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(selector: FileSelector) -> FileCandidate {
        let mut files = selector.into_files();
        assert_eq!(files.len(), 1);
        files.remove(0)
    }

    #[test]
    fn test_complete_superset_replaces_complete() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "const a = 1;", true);
        assert_eq!(
            selector.offer("a.js", "const a = 1;\nconst b = 2;", true),
            Selection::Replaced
        );
        assert_eq!(selected(selector).content, "const a = 1;\nconst b = 2;");
    }

    #[test]
    fn test_completion_replaces_partial() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "function a() {", false);
        selector.offer("a.js", "function a() {}", true);
        let file = selected(selector);
        assert!(file.is_complete);
        assert_eq!(file.content, "function a() {}");
    }

    #[test]
    fn test_longer_partial_replaces_shorter_partial() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "fun", false);
        selector.offer("a.js", "function", false);
        assert_eq!(selected(selector).content, "function");
    }

    #[test]
    fn test_shorter_never_replaces_longer() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "function a() { return 1 }", false);
        assert_eq!(selector.offer("a.js", "function a() {}", true), Selection::Kept);
        let file = selected(selector);
        assert_eq!(file.content, "function a() { return 1 }");
        assert!(!file.is_complete);
    }

    #[test]
    fn test_partial_never_replaces_complete() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "const a = 1;", true);
        assert_eq!(
            selector.offer("a.js", "const a = 1; const b", false),
            Selection::Kept
        );
        assert!(selected(selector).is_complete);
    }

    #[test]
    fn test_elided_candidate_stored_when_first() {
        let mut selector = FileSelector::default();
        assert_eq!(
            selector.offer("a.js", "import x from 'x';\n// ...\nexport default x;", true),
            Selection::Inserted
        );
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn test_elided_candidate_cannot_overwrite_clean_one() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "export const a = 1;", true);
        assert_eq!(
            selector.offer("a.js", "export const a = 1;\n// ... rest unchanged", true),
            Selection::Kept
        );
        assert_eq!(selected(selector).content, "export const a = 1;");
    }

    #[test]
    fn test_elided_candidate_can_overwrite_elided_one() {
        let mut selector = FileSelector::default();
        selector.offer("a.js", "a\n...", true);
        selector.offer("a.js", "a\nb\n...", true);
        assert_eq!(selected(selector).content, "a\nb\n...");
    }

    #[test]
    fn test_paths_are_case_sensitive() {
        let mut selector = FileSelector::default();
        selector.offer("App.jsx", "a", true);
        selector.offer("app.jsx", "b", true);
        assert_eq!(selector.len(), 2);
    }

    #[test]
    fn test_elision_marker_detection() {
        assert!(has_elision_marker("// ..."));
        assert!(has_elision_marker("{/* ... */}"));
        assert!(has_elision_marker("line\n..."));
        assert!(!has_elision_marker("<Button {...props} />"));
        assert!(!has_elision_marker("const { a, ...rest } = obj;"));
        assert!(!has_elision_marker("const merged = [...items, next];"));
        assert!(!has_elision_marker("<p>Loading...</p>"));
        assert!(!has_elision_marker("no dots here"));
    }
}
