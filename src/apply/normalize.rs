use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Environment-owned build files that generated content must never overwrite.
pub const PROTECTED_FILES: &[&str] = &[
    "package.json",
    "package-lock.json",
    "tsconfig.json",
    "vite.config.js",
    "vite.config.ts",
    "tailwind.config.js",
    "tailwind.config.ts",
    "postcss.config.js",
];

const SOURCE_ROOT: &str = "src/";
const PUBLIC_ROOT: &str = "public/";
const ENTRY_DOCUMENT: &str = "index.html";

const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx"];

static LOCAL_CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+['"]\./[^'"]+\.css['"];?[ \t]*(?:\r?\n)?"#)
        .expect("valid css import pattern")
});

static DEEP_SHADOW_TIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bshadow-[3-9]xl\b").expect("valid shadow tier pattern"));

pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn is_protected_file(path: &str) -> bool {
    PROTECTED_FILES.contains(&base_name(path))
}

/// Map an emitted path into the sandbox layout: no leading separator, and
/// anything outside `src/`, `public/` and the entry document lands under `src/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let rooted = trimmed.starts_with(SOURCE_ROOT)
        || trimmed.starts_with(PUBLIC_ROOT)
        || trimmed == ENTRY_DOCUMENT;

    if rooted || is_protected_file(trimmed) {
        trimmed.to_string()
    } else {
        format!("{SOURCE_ROOT}{trimmed}")
    }
}

/// Strip content the target toolchain cannot build.
pub fn sanitize_content<'a>(path: &str, content: &'a str) -> Cow<'a, str> {
    if SCRIPT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return LOCAL_CSS_IMPORT.replace_all(content, "");
    }
    if path.ends_with(".css") {
        return DEEP_SHADOW_TIER.replace_all(content, "shadow-2xl");
    }
    Cow::Borrowed(content)
}
