use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, VaioError};
use crate::knowledge::KnowledgeRef;
use crate::stage::Stage;

/// Durable per-asset record, stored as `<stem>.vaio.json` beside the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub stage: Stage,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_knowledge"
    )]
    pub knowledge: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub artifacts: BTreeMap<String, Value>,
}

fn deserialize_knowledge<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl AssetMetadata {
    pub fn fresh(asset: &Path) -> Self {
        Self {
            file: Some(asset.to_string_lossy().to_string()),
            stage: Stage::Init,
            knowledge: None,
            last_updated: None,
            artifacts: BTreeMap::new(),
        }
    }

    pub fn knowledge_ref(&self) -> KnowledgeRef {
        KnowledgeRef::from_field(&self.knowledge)
    }

    pub fn set_knowledge(&mut self, identity: &KnowledgeRef) {
        self.knowledge = identity.to_field();
    }

    /// Moves forward to `next`; never backwards.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if next < self.stage {
            return Err(VaioError::StageRegression {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Explicit regression, the only way back.
    pub fn reset(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn set_artifact<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        self.artifacts
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove_artifact(&mut self, key: &str) -> Option<Value> {
        self.artifacts.remove(key)
    }

    pub fn artifact_str(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).and_then(|v| v.as_str())
    }

    pub fn artifact<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.artifacts
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Reads and writes the metadata record of one asset.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    asset: PathBuf,
    path: PathBuf,
}

impl MetadataStore {
    pub fn for_asset<P: AsRef<Path>>(asset: P) -> Self {
        let asset = asset.as_ref().to_path_buf();
        let path = asset.with_extension("vaio.json");
        Self { asset, path }
    }

    pub fn asset(&self) -> &Path {
        &self.asset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the persisted record, or a fresh one if absent or unreadable.
    pub fn load(&self) -> AssetMetadata {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return AssetMetadata::fresh(&self.asset)
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read metadata, starting fresh");
                return AssetMetadata::fresh(&self.asset);
            }
        };
        match serde_json::from_str::<AssetMetadata>(&raw) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt metadata, starting fresh");
                AssetMetadata::fresh(&self.asset)
            }
        }
    }

    /// Whole-file replace through a sibling temp file; stamps `last_updated`.
    pub fn save(&self, meta: &mut AssetMetadata) -> Result<()> {
        meta.last_updated = Some(Utc::now());
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        let body = serde_json::to_vec_pretty(meta)?;
        tmp.write_all(&body)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| VaioError::Io(err.error))?;
        debug!(path = %self.path.display(), stage = %meta.stage, "metadata saved");
        Ok(())
    }

    /// Exclusive single-writer guard for the asset.
    pub fn lock_path(&self) -> PathBuf {
        self.asset.with_extension("vaio.lock")
    }

    pub fn lock(&self) -> Result<AssetLock> {
        AssetLock::acquire(self.lock_path())
    }

    /// Removes a lock left behind by a run that died; returns whether one existed.
    pub fn force_unlock(&self) -> Result<bool> {
        let path = self.lock_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(path = %path.display(), "removed stale asset lock");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug)]
pub struct AssetLock {
    path: PathBuf,
}

impl AssetLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| raw.trim().parse().ok());
                Err(VaioError::AssetLocked { path, holder })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for AssetLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to release asset lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_record_loads_fresh_default() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        let meta = store.load();
        assert_eq!(meta.stage, Stage::Init);
        assert_eq!(meta.knowledge_ref(), KnowledgeRef::Default);
        assert_eq!(store.path(), dir.path().join("clip.vaio.json"));
    }

    #[test]
    fn corrupt_record_is_replaced_on_next_save() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        fs::write(store.path(), "{ not json").unwrap();
        let mut meta = store.load();
        assert_eq!(meta.stage, Stage::Init);
        meta.advance(Stage::AudioDone).unwrap();
        store.save(&mut meta).unwrap();
        assert_eq!(store.load().stage, Stage::AudioDone);
    }

    #[test]
    fn knowledge_null_and_absent_round_trip_distinctly() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        let mut meta = store.load();
        meta.set_knowledge(&KnowledgeRef::Disabled);
        store.save(&mut meta).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"knowledge\": null"));
        assert_eq!(store.load().knowledge_ref(), KnowledgeRef::Disabled);

        let mut meta = store.load();
        meta.set_knowledge(&KnowledgeRef::Default);
        store.save(&mut meta).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("knowledge"));
    }

    #[test]
    fn artifacts_are_flattened_and_stamped() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        let mut meta = store.load();
        meta.set_artifact("caption_lang", "en").unwrap();
        let mut outcomes = BTreeMap::new();
        outcomes.insert("de".to_string(), true);
        outcomes.insert("fr".to_string(), false);
        meta.set_artifact("translations", &outcomes).unwrap();
        store.save(&mut meta).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value["caption_lang"], "en");
        assert_eq!(value["translations"]["fr"], false);
        assert!(value["last_updated"].is_string());

        let loaded = store.load();
        assert_eq!(loaded.artifact_str("caption_lang"), Some("en"));
        let map: BTreeMap<String, bool> = loaded.artifact("translations").unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn advance_refuses_regression() {
        let mut meta = AssetMetadata::fresh(Path::new("clip.mp4"));
        meta.advance(Stage::CaptionsDone).unwrap();
        let err = meta.advance(Stage::AudioDone).unwrap_err();
        assert!(matches!(err, VaioError::StageRegression { .. }));
        assert_eq!(meta.stage, Stage::CaptionsDone);
        meta.reset(Stage::Init);
        assert_eq!(meta.stage, Stage::Init);
    }

    #[test]
    fn second_lock_fails_until_first_is_dropped() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        let first = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(VaioError::AssetLocked { .. })));
        drop(first);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn leftover_lock_names_its_path_and_can_be_broken() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::for_asset(dir.path().join("clip.mp4"));
        let leftover = store.lock().unwrap();
        std::mem::forget(leftover);

        let err = store.lock().unwrap_err();
        match &err {
            VaioError::AssetLocked { path, holder } => {
                assert_eq!(path, &store.lock_path());
                assert_eq!(*holder, Some(std::process::id()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(&store.lock_path().display().to_string()));

        assert!(store.force_unlock().unwrap());
        assert!(!store.force_unlock().unwrap());
        assert!(store.lock().is_ok());
    }
}
