use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::convert::{self, FileFormat};

const IGNORE_NAMES: &[&str] = &[
    ".DS_Store",
    ".gitkeep",
    ".gitignore",
    ".env",
    "__pycache__",
    "node_modules",
    "tmp",
    "venv",
];
const IGNORE_EXTS: &[&str] = &["db", "sqlite", "lock", "log", "bak", "tmp", "old"];

pub const CATEGORY_MARKETING: &str = "marketing";
pub const CATEGORY_REFERENCE: &str = "reference";

/// Normalized text of one source file with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source: String,
    pub category: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Loads every usable file under `path` (or `path` itself), ordered by path.
pub fn load_documents(path: &Path) -> Vec<Document> {
    let root = if path.is_file() {
        path.parent().unwrap_or(Path::new("")).to_path_buf()
    } else {
        path.to_path_buf()
    };
    let mut docs = Vec::new();
    for file in candidate_files(path) {
        let Some(format) = FileFormat::detect(&file) else {
            debug!(path = %file.display(), "unsupported format, skipping");
            continue;
        };
        let extracted = match convert::extract(&file, format) {
            Ok(extracted) => extracted,
            Err(err) => {
                warn!(path = %file.display(), error = %format!("{err:#}"), "unreadable document skipped");
                continue;
            }
        };
        let text = extracted.text.trim();
        if text.is_empty() {
            debug!(path = %file.display(), "empty document skipped");
            continue;
        }
        let category = extracted
            .category
            .unwrap_or_else(|| category_for(&root, &file).to_string());
        docs.push(Document {
            text: text.to_string(),
            source: file.to_string_lossy().to_string(),
            category,
            fields: extracted.fields,
        });
    }
    info!(count = docs.len(), path = %path.display(), "documents loaded");
    docs
}

/// Files that pass the ignore rules, sorted lexicographically.
pub fn candidate_files(path: &Path) -> Vec<PathBuf> {
    if !path.exists() {
        return Vec::new();
    }
    if path.is_file() {
        return if is_ignored_file(path) {
            Vec::new()
        } else {
            vec![path.to_path_buf()]
        };
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored_entry(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "failed to walk knowledge directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|p| !is_ignored_file(p))
        .collect();
    files.sort();
    files
}

pub fn has_source_files(path: &Path) -> bool {
    !candidate_files(path).is_empty()
}

fn is_ignored_entry(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORE_NAMES.contains(&name.as_ref())
}

fn is_ignored_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return true,
    };
    if name.starts_with('.') || IGNORE_NAMES.contains(&name) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IGNORE_EXTS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Path-derived category, judged on the path below the knowledge root.
pub fn category_for(root: &Path, file: &Path) -> &'static str {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let normalized = format!(
        "/{}",
        relative.to_string_lossy().replace('\\', "/").to_lowercase()
    );
    if normalized.contains("/reference/") || normalized.contains("gia") || normalized.contains("guide") {
        CATEGORY_REFERENCE
    } else {
        CATEGORY_MARKETING
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_sorted_and_skips_ignored_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("reference")).unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("b.md"), "brand voice").unwrap();
        fs::write(root.join("a.txt"), "about us").unwrap();
        fs::write(root.join("reference/spec.txt"), "tech sheet").unwrap();
        fs::write(root.join("empty.txt"), "   \n").unwrap();
        fs::write(root.join("index.sqlite"), "binary").unwrap();
        fs::write(root.join(".hidden.txt"), "secret").unwrap();
        fs::write(root.join(".DS_Store"), "junk").unwrap();
        fs::write(root.join("node_modules/x.txt"), "dep").unwrap();
        fs::write(root.join(".cache/y.txt"), "cache").unwrap();
        fs::write(root.join("photo.png"), "png").unwrap();

        let docs = load_documents(root);
        let names: Vec<String> = docs
            .iter()
            .map(|d| Path::new(&d.source).file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md", "spec.txt"]);
        assert_eq!(docs[0].category, CATEGORY_MARKETING);
        assert_eq!(docs[2].category, CATEGORY_REFERENCE);
    }

    #[test]
    fn declared_category_and_fields_pass_through() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("brand.json"),
            r#"{"category": "reference", "brand": "Acme", "slogan": "Fast"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("prices.csv"), "item,price\nkit,10\n").unwrap();
        let docs = load_documents(dir.path());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].category, CATEGORY_REFERENCE);
        assert_eq!(docs[0].fields.get("brand").map(String::as_str), Some("Acme"));
        assert_eq!(docs[1].text, "item, price\nkit, 10");
    }

    #[test]
    fn single_file_and_missing_paths() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("user-guide.md");
        fs::write(&file, "step one").unwrap();
        let docs = load_documents(&file);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].category, CATEGORY_REFERENCE);
        assert!(load_documents(&dir.path().join("missing")).is_empty());
        assert!(!has_source_files(&dir.path().join("missing")));
        assert!(has_source_files(dir.path()));
    }

    #[test]
    fn broken_files_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{ nope").unwrap();
        fs::write(dir.path().join("good.txt"), "fine").unwrap();
        let docs = load_documents(dir.path());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "fine");
    }
}
