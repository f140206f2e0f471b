//! Base config + per-task config loading, validation, and the hot-reload
//! snapshot published to every running node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::{ConfigError, ConfigResult, NodeTag};

const ETH_ADDRESS_RE: &str = r"^0x[a-fA-F0-9]{40}$";

/// The top-level, process-wide settings: where the marketplace node lives,
/// which Ethereum identity to act as, and which task config files make up
/// the fleet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaseConfig {
    pub node_address: String,
    pub ethereum: EthereumConfig,
    pub tasks: Vec<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EthereumConfig {
    pub key_dir: PathBuf,
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

impl BaseConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileError {
            path: path_str.clone(),
            source,
        })?;

        let value: serde_yaml::Value =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::YamlError {
                path: path_str.clone(),
                source,
            })?;

        let required = ["node_address", "ethereum", "tasks"];
        let missing: Vec<String> = required
            .iter()
            .filter(|key| value.get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys {
                path: path_str,
                keys: missing,
            });
        }

        let mut config: BaseConfig =
            serde_yaml::from_value(value).map_err(|source| ConfigError::YamlError {
                path: path_str,
                source,
            })?;

        dotenv::dotenv().ok();
        if let Ok(passphrase) = std::env::var("ETH_PASSPHRASE") {
            config.ethereum.passphrase = Some(passphrase);
        }

        config.log();
        Ok(config)
    }

    fn log(&self) {
        info!("base config loaded:");
        info!("  node address: {}", self.node_address);
        info!("  ethereum key dir: {}", self.ethereum.key_dir.display());
        info!("  tasks: {}", self.tasks.len());
        info!("  log level: {}", self.log_level);
    }

    /// Resolve the Ethereum identity key file: the first entry found under
    /// `key_dir`, in whatever order the filesystem yields (matching how
    /// the marketplace CLI itself resolves identities).
    pub fn resolve_key_file(&self) -> ConfigResult<PathBuf> {
        let entries = std::fs::read_dir(&self.ethereum.key_dir).map_err(|source| {
            ConfigError::FileError {
                path: self.ethereum.key_dir.display().to_string(),
                source,
            }
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(ConfigError::NoKeyFile(
            self.ethereum.key_dir.display().to_string(),
        ))
    }
}

/// One task config file: the task document template, how many nodes to
/// run from it, the pricing/runtime knobs, and the resource/benchmark
/// fields each of those nodes advertises in its bid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    pub tag: String,
    pub numberofnodes: u32,
    pub template_file: PathBuf,
    #[serde(default = "default_duration")]
    pub duration: String,
    #[serde(default = "default_identity")]
    pub identity: String,

    pub counterparty: Option<String>,
    pub max_price: Option<f64>,
    #[serde(default = "default_price_coefficient")]
    pub price_coefficient: i64,

    /// "Earliest tolerable stop": seconds a task must run before a later
    /// failure no longer counts as "never delivered" for blacklisting.
    #[serde(default = "default_ets")]
    pub ets: u64,

    pub ramsize: u64,
    pub storagesize: u64,
    pub cpucores: u32,
    pub sysbenchsingle: u32,
    pub sysbenchmulti: u32,
    pub netdownload: u32,
    pub netupload: u32,
    pub gpucount: u32,
    pub gpumem: u64,
    pub ethhashrate: u64,
    #[serde(default)]
    pub overlay: bool,
    #[serde(default)]
    pub incoming: bool,
}

fn default_duration() -> String {
    "0h".to_string()
}

fn default_identity() -> String {
    "anonymous".to_string()
}

fn default_price_coefficient() -> i64 {
    0
}

fn default_ets() -> u64 {
    300
}

impl TaskConfig {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileError {
            path: path_str.clone(),
            source,
        })?;
        let mut config: TaskConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::YamlError {
                path: path_str,
                source,
            })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> ConfigResult<()> {
        if self.numberofnodes == 0 {
            return Err(ConfigError::ValidationError(
                "numberofnodes must be greater than 0".to_string(),
            ));
        }
        if self.tag.trim().is_empty() {
            return Err(ConfigError::ValidationError("tag must not be empty".to_string()));
        }
        if self.gpucount == 0 {
            // spec invariant: no GPUs means no GPU-derived benchmarks.
            self.gpumem = 0;
            self.ethhashrate = 0;
        }
        if let Some(counterparty) = &self.counterparty {
            let re = Regex::new(ETH_ADDRESS_RE).expect("static regex is valid");
            if !re.is_match(counterparty) {
                warn!(
                    tag = %self.tag,
                    counterparty = %counterparty,
                    "counterparty does not look like an Ethereum address, treating as absent"
                );
                self.counterparty = None;
            }
        }
        Ok(())
    }

    /// Expand into one per-node tag: `<tag>_1`, `<tag>_2`, ... `<tag>_N`.
    pub fn node_tags(&self) -> Vec<NodeTag> {
        (1..=self.numberofnodes)
            .map(|i| NodeTag::new(format!("{}_{}", self.tag, i)))
            .collect()
    }
}

/// A fully resolved, immutable view of the fleet's configuration at one
/// point in time. Published behind an `Arc` so node workers can hold a
/// snapshot without racing a concurrent reload.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub base: BaseConfig,
    pub nodes: HashMap<NodeTag, TaskConfig>,
}

/// Owns the live snapshot and knows how to reload it from disk.
pub struct ConfigManager {
    base_path: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigManager {
    pub fn load(base_path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let base_path = base_path.into();
        let snapshot = Self::build_snapshot(&base_path)?;
        Ok(Self {
            base_path,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Reload base + task configs from disk. A task config that now fails
    /// validation is skipped (its nodes keep running under their
    /// last-known-good config); everything else is published atomically.
    pub fn reload(&self) -> ConfigResult<()> {
        match Self::build_snapshot(&self.base_path) {
            Ok(snapshot) => {
                *self.current.write() = Arc::new(snapshot);
                info!("config reloaded");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "config reload failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    fn build_snapshot(base_path: &Path) -> ConfigResult<ConfigSnapshot> {
        let base = BaseConfig::load(base_path)?;
        let base_dir = base_path.parent().unwrap_or_else(|| Path::new("."));

        let mut nodes = HashMap::new();
        for task_path in &base.tasks {
            let resolved = base_dir.join(task_path);
            let mut task = match TaskConfig::load(&resolved) {
                Ok(t) => t,
                Err(e) => {
                    error!(path = %resolved.display(), error = %e, "skipping invalid task config");
                    continue;
                }
            };
            // `template_file` is written relative to the task config file,
            // not the process's working directory, so resolve it here once.
            if task.template_file.is_relative() {
                if let Some(task_dir) = resolved.parent() {
                    task.template_file = task_dir.join(&task.template_file);
                }
            }
            for tag in task.node_tags() {
                if nodes.insert(tag.clone(), task.clone()).is_some() {
                    return Err(ConfigError::DuplicateTag(tag.0));
                }
            }
        }

        Ok(ConfigSnapshot { base, nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn base_config_reports_all_missing_keys_at_once() {
        let file = write_temp("log_level: info\n");
        let err = BaseConfig::load(file.path()).unwrap_err();
        match err {
            ConfigError::MissingKeys { keys, .. } => {
                assert_eq!(keys, vec!["node_address", "ethereum", "tasks"]);
            }
            other => panic!("expected MissingKeys, got {other:?}"),
        }
    }

    fn minimal_task_yaml(tag: &str, nodes: u32, gpucount: u32) -> String {
        format!(
            "tag: {tag}\nnumberofnodes: {nodes}\ntemplate_file: task.yaml\nramsize: 1024\nstoragesize: 10\ncpucores: 2\nsysbenchsingle: 1000\nsysbenchmulti: 2000\nnetdownload: 100\nnetupload: 100\ngpucount: {gpucount}\ngpumem: 4096\nethhashrate: 500\n"
        )
    }

    #[test]
    fn task_config_zeroes_gpu_fields_when_gpu_count_is_zero() {
        let file = write_temp(&minimal_task_yaml("cpu-pool", 2, 0));
        let config = TaskConfig::load(file.path()).unwrap();
        assert_eq!(config.gpumem, 0);
        assert_eq!(config.ethhashrate, 0);
    }

    #[test]
    fn task_config_rejects_zero_nodes() {
        let file = write_temp(&minimal_task_yaml("cpu-pool", 0, 0));
        assert!(TaskConfig::load(file.path()).is_err());
    }

    #[test]
    fn task_config_drops_malformed_counterparty() {
        let mut yaml = minimal_task_yaml("cpu-pool", 1, 0);
        yaml.push_str("counterparty: not-an-address\n");
        let file = write_temp(&yaml);
        let config = TaskConfig::load(file.path()).unwrap();
        assert_eq!(config.counterparty, None);
    }

    #[test]
    fn node_tags_expand_with_one_based_ordinal() {
        let file = write_temp(&minimal_task_yaml("gpu", 3, 1));
        let config = TaskConfig::load(file.path()).unwrap();
        let tags: Vec<String> = config.node_tags().into_iter().map(|t| t.0).collect();
        assert_eq!(tags, vec!["gpu_1", "gpu_2", "gpu_3"]);
    }

    fn base_with_key_dir(key_dir: PathBuf) -> BaseConfig {
        BaseConfig {
            node_address: "http://localhost".to_string(),
            ethereum: EthereumConfig {
                key_dir,
                passphrase: None,
            },
            tasks: Vec::new(),
            log_level: default_log_level(),
            out_dir: default_out_dir(),
        }
    }

    #[test]
    fn resolve_key_file_fails_on_empty_key_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = base_with_key_dir(dir.path().to_path_buf());
        match base.resolve_key_file().unwrap_err() {
            ConfigError::NoKeyFile(path) => assert_eq!(path, dir.path().display().to_string()),
            other => panic!("expected NoKeyFile, got {other:?}"),
        }
    }

    #[test]
    fn resolve_key_file_fails_on_missing_key_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let base = base_with_key_dir(missing);
        assert!(matches!(base.resolve_key_file(), Err(ConfigError::FileError { .. })));
    }

    #[test]
    fn resolve_key_file_finds_the_identity_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("identity.json"), "{}").unwrap();
        let base = base_with_key_dir(dir.path().to_path_buf());
        let found = base.resolve_key_file().unwrap();
        assert_eq!(found, dir.path().join("identity.json"));
    }
}
