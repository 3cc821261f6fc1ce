use crate::error::{ReftrackError, Result as ReftrackResult};
use crate::rules::{default_rule_configs, MatchRuleConfig, MatchRuleSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".reftrack.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,

    #[serde(default = "default_rule_configs")]
    pub rules: Vec<MatchRuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Skip generated `*.Designer.*` code-behind files.
    pub exclude_designer_files: bool,
    pub resource_extensions: Vec<String>,
    /// Worker threads; the number of logical CPUs when unset.
    pub parallel_jobs: Option<usize>,
    /// Upper bound, in bytes, for a compiled match template.
    pub regex_size_limit: usize,
    pub respect_gitignore: bool,
    pub include_hidden: bool,
}

fn default_regex_size_limit() -> usize {
    1024 * 1024
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_designer_files: true,
            resource_extensions: vec![
                ".resx".to_string(),
                ".resw".to_string(),
                ".restext".to_string(),
            ],
            parallel_jobs: None,
            regex_size_limit: default_regex_size_limit(),
            respect_gitignore: true,
            include_hidden: false,
        }
    }
}

impl ScanConfig {
    pub fn worker_threads(&self) -> usize {
        self.parallel_jobs.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            rules: default_rule_configs(),
        }
    }
}

impl Config {
    /// Loads `explicit` if given, otherwise the first config file found in
    /// the usual locations, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_path(),
        };

        let config = if let Some(path) = config_path {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            log::debug!("Loaded configuration from {}", path.display());
            config
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Some(xdg_config) = dirs::config_dir() {
            let xdg_path = xdg_config.join("reftrack/config.toml");
            if xdg_path.exists() {
                return Some(xdg_path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let home_path = home.join(CONFIG_FILE_NAME);
            if home_path.exists() {
                return Some(home_path);
            }
        }

        let current_path = Path::new(CONFIG_FILE_NAME);
        if current_path.exists() {
            return Some(current_path.to_path_buf());
        }

        None
    }

    /// Rejects rules without extensions. Templates are checked at match time.
    pub fn validate(&self) -> ReftrackResult<()> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.parse_extensions().is_empty() {
                return Err(ReftrackError::Config(format!(
                    "rule #{} has an empty extension list",
                    index + 1
                )));
            }
        }
        if self.scan.regex_size_limit == 0 {
            return Err(ReftrackError::Config(
                "scan.regex_size_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Snapshot of the rules; later edits to `self` do not reach it.
    pub fn rule_set(&self) -> ReftrackResult<MatchRuleSet> {
        MatchRuleSet::from_configs(&self.rules)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
