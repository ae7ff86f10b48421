use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static INVALID_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("static regex"));

const DEFAULT_NAME: &str = "default";
const COLLECTION_PREFIX: &str = "vaio_kb_";
const MAX_NAME_LEN: usize = 128;

/// Knowledge-base identity as stored in asset metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KnowledgeRef {
    #[default]
    Default,
    Disabled,
    Named(String),
}

impl KnowledgeRef {
    /// Maps the metadata field: absent → default, `null` → disabled.
    pub fn from_field(field: &Option<Option<String>>) -> Self {
        match field {
            None => KnowledgeRef::Default,
            Some(None) => KnowledgeRef::Disabled,
            Some(Some(value)) => Self::parse(value),
        }
    }

    pub fn to_field(&self) -> Option<Option<String>> {
        match self {
            KnowledgeRef::Default => None,
            KnowledgeRef::Disabled => Some(None),
            KnowledgeRef::Named(value) => Some(Some(value.clone())),
        }
    }

    /// Parses user input (`none`/`null` disable, empty/`default` reset).
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_lowercase().as_str() {
            "" | DEFAULT_NAME => KnowledgeRef::Default,
            "none" | "null" => KnowledgeRef::Disabled,
            _ => KnowledgeRef::Named(trimmed.to_string()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, KnowledgeRef::Disabled)
    }

    /// Resolves to a concrete location, `None` when retrieval is disabled.
    pub fn resolve(&self, roots: &KbRoots) -> Option<KbLocation> {
        match self {
            KnowledgeRef::Disabled => None,
            KnowledgeRef::Default => Some(KbLocation::new(
                DEFAULT_NAME.to_string(),
                roots.default_source_dir(),
                roots,
            )),
            KnowledgeRef::Named(value) => {
                let normalized = value.trim_end_matches(['/', '\\']);
                let source_dir = if looks_like_path(normalized) {
                    PathBuf::from(normalized)
                } else {
                    roots.source_root.join(normalized)
                };
                let stem = Path::new(normalized)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_NAME);
                let digest = blake3::hash(normalized.as_bytes()).to_hex();
                let name = sanitize_collection_name(&format!("{}_{}", stem, &digest[..8]));
                Some(KbLocation::new(name, source_dir, roots))
            }
        }
    }
}

impl fmt::Display for KnowledgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnowledgeRef::Default => f.write_str(DEFAULT_NAME),
            KnowledgeRef::Disabled => f.write_str("disabled"),
            KnowledgeRef::Named(value) => f.write_str(value),
        }
    }
}

fn looks_like_path(value: &str) -> bool {
    Path::new(value).is_absolute() || value.contains('/') || value.contains('\\')
}

#[derive(Debug, Clone)]
pub struct KbRoots {
    pub source_root: PathBuf,
    pub data_root: PathBuf,
}

impl KbRoots {
    pub fn new(source_root: impl Into<PathBuf>, data_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            data_root: data_root.into(),
        }
    }

    pub fn default_source_dir(&self) -> PathBuf {
        self.source_root.join(DEFAULT_NAME)
    }

    pub fn ensure_default_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.default_source_dir())?;
        std::fs::create_dir_all(&self.data_root)
    }
}

/// A resolved knowledge base: where its files live and where its index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbLocation {
    pub name: String,
    pub collection: String,
    pub source_dir: PathBuf,
    pub persist_dir: PathBuf,
}

impl KbLocation {
    fn new(name: String, source_dir: PathBuf, roots: &KbRoots) -> Self {
        let collection = sanitize_collection_name(&format!("{COLLECTION_PREFIX}{name}"));
        let persist_dir = roots.data_root.join(&name);
        Self {
            name,
            collection,
            source_dir,
            persist_dir,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.persist_dir.join("index.sqlite")
    }
}

pub fn sanitize_collection_name(name: &str) -> String {
    let replaced = INVALID_NAME_CHARS.replace_all(name, "_");
    let mut base = replaced.trim_matches(['.', '_', '-']).to_string();
    if base.len() < 3 {
        base = format!(
            "kb_{}",
            if base.is_empty() { DEFAULT_NAME } else { &base }
        );
    }
    base.chars().take(MAX_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roots() -> KbRoots {
        KbRoots::new("/srv/knowledge", "/srv/data/kb")
    }

    #[test]
    fn metadata_field_maps_to_variants() {
        assert_eq!(KnowledgeRef::from_field(&None), KnowledgeRef::Default);
        assert_eq!(KnowledgeRef::from_field(&Some(None)), KnowledgeRef::Disabled);
        assert_eq!(
            KnowledgeRef::from_field(&Some(Some("null".into()))),
            KnowledgeRef::Disabled
        );
        assert_eq!(
            KnowledgeRef::from_field(&Some(Some("/kb/brand".into()))),
            KnowledgeRef::Named("/kb/brand".into())
        );
        assert_eq!(KnowledgeRef::Disabled.to_field(), Some(None));
        assert_eq!(KnowledgeRef::Default.to_field(), None);
    }

    #[test]
    fn default_resolves_to_default_location() {
        let loc = KnowledgeRef::Default.resolve(&roots()).unwrap();
        assert_eq!(loc.name, "default");
        assert_eq!(loc.collection, "vaio_kb_default");
        assert_eq!(loc.source_dir, PathBuf::from("/srv/knowledge/default"));
        assert_eq!(loc.persist_dir, PathBuf::from("/srv/data/kb/default"));
        assert!(KnowledgeRef::Disabled.resolve(&roots()).is_none());
    }

    #[test]
    fn named_paths_with_same_leaf_do_not_collide() {
        let a = KnowledgeRef::Named("/a/brand".into()).resolve(&roots()).unwrap();
        let b = KnowledgeRef::Named("/b/brand".into()).resolve(&roots()).unwrap();
        assert_ne!(a.collection, b.collection);
        assert!(a.name.starts_with("brand_"));
        let bare = KnowledgeRef::Named("brand".into()).resolve(&roots()).unwrap();
        assert_eq!(bare.source_dir, PathBuf::from("/srv/knowledge/brand"));
    }

    #[test]
    fn sanitize_handles_short_and_invalid_names() {
        assert_eq!(sanitize_collection_name("a"), "kb_a");
        assert_eq!(sanitize_collection_name("__"), "kb_default");
        assert_eq!(sanitize_collection_name("my kb!/x"), "my_kb_x");
        assert!(sanitize_collection_name(&"x".repeat(300)).len() <= MAX_NAME_LEN);
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(raw in "[a-zA-Z0-9 ._/-]{1,40}") {
            let identity = KnowledgeRef::parse(&raw);
            let first = identity.resolve(&roots());
            let second = KnowledgeRef::parse(&raw).resolve(&roots());
            prop_assert_eq!(&first, &second);
            if let Some(loc) = first {
                prop_assert!(loc.collection.len() >= 3);
                prop_assert!(loc
                    .collection
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
            }
        }
    }
}
