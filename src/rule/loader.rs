//! Rule loader
//! Scans the rule directories, parses every file and builds the normalized tree set

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::cache::{RuleCacheManager, RuleFingerprint};
use super::model::RuleScope;
use super::parser::RuleParser;
use super::tree::{StrictParents, TreeHooks};
use super::tree_set::{BrowserTreeSet, TreeSetBuilder};
use crate::config::GlobalConfig;
use crate::error::{BcResult, BrowserCapsError};

/// Rule loader
pub struct RuleLoader;

impl RuleLoader {
    /// Load with the default hooks (missing parents are fatal).
    pub fn load(config: &GlobalConfig) -> BcResult<BrowserTreeSet> {
        Self::load_with_hooks(config, &StrictParents)
    }

    pub fn load_with_hooks(config: &GlobalConfig, hooks: &dyn TreeHooks) -> BcResult<BrowserTreeSet> {
        let start = Instant::now();

        // 1. Collect rule files, machine level first
        let machine_files = Self::rule_files(&config.machine_rules_dir, config)?;
        let app_files = match &config.app_rules_dir {
            Some(dir) => Self::rule_files(dir, config)?,
            None => Vec::new(),
        };

        // 2. Try the cache
        let fingerprint = if config.use_cache {
            let all: Vec<PathBuf> = machine_files.iter().chain(app_files.iter()).cloned().collect();
            Some(RuleFingerprint::of_files(&all)?)
        } else {
            None
        };
        if let Some(fingerprint) = &fingerprint {
            match RuleCacheManager::load(config, fingerprint) {
                Ok(trees) => {
                    debug!("rule trees loaded from cache in {:?}", start.elapsed());
                    return Ok(trees);
                }
                Err(e) => debug!("rule cache not usable, rebuilding: {}", e),
            }
        }

        // 3. Parse and normalize
        let mut builder = TreeSetBuilder::new();
        for file in &machine_files {
            builder.add_all(RuleParser::parse_file(file, RuleScope::Machine)?)?;
        }
        for file in &app_files {
            builder.add_all(RuleParser::parse_file(file, RuleScope::Application)?)?;
        }
        let trees = builder.build(hooks)?;

        // 4. Write the cache; failure here is not fatal
        if let Some(fingerprint) = &fingerprint {
            if let Err(e) = RuleCacheManager::save(config, fingerprint, &trees) {
                warn!("failed to write rule cache {}: {}", config.rule_cache_path.display(), e);
            }
        }

        info!(
            "loaded {} rule files ({} machine, {} application), {} nodes in {:?}",
            machine_files.len() + app_files.len(),
            machine_files.len(),
            app_files.len(),
            trees.node_count(),
            start.elapsed()
        );
        Ok(trees)
    }

    /// Load on the blocking pool.
    #[cfg(feature = "async-io")]
    pub async fn load_async(config: GlobalConfig) -> BcResult<BrowserTreeSet> {
        tokio::task::spawn_blocking(move || Self::load(&config))
            .await
            .map_err(|e| BrowserCapsError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Rule files under `dir` (recursive) in processing order.
    pub fn rule_files(dir: &Path, config: &GlobalConfig) -> BcResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(BrowserCapsError::ConfigError(format!(
                "rule directory {} does not exist",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| BrowserCapsError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches_ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&config.rule_extension));
            if matches_ext {
                files.push(entry.into_path());
            }
        }

        let files = Self::order_files(files, &config.hoisted_files);
        debug!("{}: {} rule files", dir.display(), files.len());
        Ok(files)
    }

    /// Case-insensitive name order, hoisted names first in their configured order.
    fn order_files(mut files: Vec<PathBuf>, hoisted: &[String]) -> Vec<PathBuf> {
        let lower_name = |p: &PathBuf| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        };
        files.sort_by(|a, b| lower_name(a).cmp(&lower_name(b)).then_with(|| a.cmp(b)));

        let mut ordered = Vec::with_capacity(files.len());
        for name in hoisted {
            let name = name.to_lowercase();
            let (front, rest): (Vec<PathBuf>, Vec<PathBuf>) = files.into_iter().partition(|f| lower_name(f) == name);
            ordered.extend(front);
            files = rest;
        }
        ordered.extend(files);
        ordered
    }
}
