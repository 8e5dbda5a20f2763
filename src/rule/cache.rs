//! Rule cache management
//! Persists the normalized tree set as MessagePack, keyed by a fingerprint of the rule files

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rmp_serde::{from_slice, Serializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree_set::BrowserTreeSet;
use crate::config::GlobalConfig;
use crate::error::{BcResult, BrowserCapsError};

/// Bumped whenever the serialized layout changes.
const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileStamp {
    path: String,
    size: u64,
    modified_secs: u64,
    modified_nanos: u32,
}

/// Name, size and modification time of every rule file that went into a tree set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFingerprint {
    files: Vec<FileStamp>,
}

impl RuleFingerprint {
    pub fn of_files(files: &[PathBuf]) -> BcResult<Self> {
        let mut stamps = Vec::with_capacity(files.len());
        for file in files {
            let metadata = std::fs::metadata(file)?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .unwrap_or_default();
            stamps.push(FileStamp {
                path: file.to_string_lossy().into_owned(),
                size: metadata.len(),
                modified_secs: modified.as_secs(),
                modified_nanos: modified.subsec_nanos(),
            });
        }
        Ok(Self { files: stamps })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    fingerprint: RuleFingerprint,
    trees: BrowserTreeSet,
}

/// Rule cache manager
pub struct RuleCacheManager;

impl RuleCacheManager {
    /// Load the cached tree set. Missing, corrupt and stale caches are all errors.
    pub fn load(config: &GlobalConfig, fingerprint: &RuleFingerprint) -> BcResult<BrowserTreeSet> {
        Self::load_from(&config.rule_cache_path, fingerprint)
    }

    pub fn load_from(path: &Path, fingerprint: &RuleFingerprint) -> BcResult<BrowserTreeSet> {
        let data = std::fs::read(path)?;

        let envelope: CacheEnvelope = from_slice(&data)
            .map_err(|e| BrowserCapsError::RuleCacheError(format!("deserialization failed: {}", e)))?;
        if envelope.version != CACHE_FORMAT_VERSION {
            return Err(BrowserCapsError::RuleCacheError(format!(
                "format version {} != {}",
                envelope.version, CACHE_FORMAT_VERSION
            )));
        }
        if &envelope.fingerprint != fingerprint {
            return Err(BrowserCapsError::RuleCacheError("rule files changed since the cache was written".into()));
        }

        debug!(
            "rule cache loaded from {}: {} nodes, {} files",
            path.display(),
            envelope.trees.node_count(),
            fingerprint.file_count()
        );
        Ok(envelope.trees)
    }

    pub fn save(config: &GlobalConfig, fingerprint: &RuleFingerprint, trees: &BrowserTreeSet) -> BcResult<()> {
        Self::save_to(&config.rule_cache_path, fingerprint, trees)
    }

    pub fn save_to(path: &Path, fingerprint: &RuleFingerprint, trees: &BrowserTreeSet) -> BcResult<()> {
        let envelope = CacheEnvelope {
            version: CACHE_FORMAT_VERSION,
            fingerprint: fingerprint.clone(),
            trees: trees.clone(),
        };

        let mut data = Vec::new();
        envelope
            .serialize(&mut Serializer::new(&mut data))
            .map_err(|e| BrowserCapsError::RuleCacheError(format!("serialization failed: {}", e)))?;
        debug!("rule cache serialized: {} bytes", data.len());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Remove the cache file if present
    pub fn clear(config: &GlobalConfig) -> BcResult<()> {
        let path = &config.rule_cache_path;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::model::{BrowserDefinition, NodeKind, RuleScope};
    use crate::rule::tree::StrictParents;
    use crate::rule::tree_set::TreeSetBuilder;

    fn sample_set() -> BrowserTreeSet {
        let mut builder = TreeSetBuilder::new();
        builder
            .add(BrowserDefinition::new("Default", NodeKind::Browser, RuleScope::Machine))
            .unwrap();
        builder
            .add(BrowserDefinition::new("IE", NodeKind::Browser, RuleScope::Machine).with_parent("Default"))
            .unwrap();
        builder.build(&StrictParents).unwrap()
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let rule = dir.path().join("ie.browser");
        std::fs::write(&rule, "<browsers/>").unwrap();
        let cache = dir.path().join("cache/rules.mp");

        let fingerprint = RuleFingerprint::of_files(&[rule]).unwrap();
        RuleCacheManager::save_to(&cache, &fingerprint, &sample_set()).unwrap();

        let loaded = RuleCacheManager::load_from(&cache, &fingerprint).unwrap();
        assert_eq!(loaded.browsers.len(), 2);
        assert_eq!(loaded.browsers.get("ie").unwrap().depth, 1);
    }

    #[test]
    fn stale_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rule = dir.path().join("ie.browser");
        std::fs::write(&rule, "<browsers/>").unwrap();
        let cache = dir.path().join("rules.mp");

        let fingerprint = RuleFingerprint::of_files(&[rule.clone()]).unwrap();
        RuleCacheManager::save_to(&cache, &fingerprint, &sample_set()).unwrap();

        std::fs::write(&rule, "<browsers>\n</browsers>").unwrap();
        let changed = RuleFingerprint::of_files(&[rule]).unwrap();
        assert!(matches!(
            RuleCacheManager::load_from(&cache, &changed),
            Err(BrowserCapsError::RuleCacheError(_))
        ));
    }

    #[test]
    fn corrupt_cache_is_rejected_and_clear_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("rules.mp");
        std::fs::write(&cache, b"not msgpack").unwrap();
        assert!(RuleCacheManager::load_from(&cache, &RuleFingerprint::default()).is_err());

        let config = GlobalConfig {
            rule_cache_path: cache.clone(),
            ..GlobalConfig::default()
        };
        RuleCacheManager::clear(&config).unwrap();
        assert!(!cache.exists());
        RuleCacheManager::clear(&config).unwrap();
    }
}
