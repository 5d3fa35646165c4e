//! # Node Settings
//!
//! Two TOML files drive the node:
//!
//! - `config.toml` ([`NodeSettings`]) in the data directory: where the
//!   database lives, the catalog path, ports, intervals and log options.
//!   Every field has a default; CLI flags and env vars override it.
//! - The catalog ([`CatalogFile`]): conversion rules, campaigns and the
//!   rewards seeded at `init`. Rules are validated on load and a bad
//!   definition stops the node.
//!
//! Timestamps and dates in the catalog are written as quoted strings
//! (`"2026-01-01T00:00:00Z"`, `"2026-03-01"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use loyalty_engine::config::{DEFAULT_METRICS_PORT, DEFAULT_RECONCILE_INTERVAL};
use loyalty_engine::rules::{CampaignBonus, ConversionRule, RuleSet};
use loyalty_redemption::Reward;

use crate::logging::LogFormat;

/// File name of the settings file inside the data directory.
pub const SETTINGS_FILE: &str = "config.toml";

// ---------------------------------------------------------------------------
// NodeSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    /// Rules, campaigns and rewards. Scoring runs with no rules (default
    /// multiplier) when unset.
    pub catalog: Option<PathBuf>,
    pub reconcile_interval_secs: u64,
    pub metrics_port: u16,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".loyalty"),
            catalog: None,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL.as_secs(),
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Pretty,
            log_level: "loyalty_node=info,loyalty_engine=info,loyalty_redemption=info".to_string(),
        }
    }
}

impl NodeSettings {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid node settings")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Settings for a data directory: `explicit` if given, else
    /// `<data_dir>/config.toml` if present, else defaults. The data
    /// directory argument wins over whatever the file says.
    pub fn resolve(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let mut settings = match (explicit, data_dir) {
            (Some(path), _) => Self::load(path)?,
            (None, Some(dir)) if dir.join(SETTINGS_FILE).exists() => Self::load(&dir.join(SETTINGS_FILE))?,
            _ => Self::default(),
        };
        if let Some(dir) = data_dir {
            settings.data_dir = dir.to_path_buf();
        }
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to encode node settings")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    /// The rule catalog, or an empty one when no catalog is configured.
    pub fn load_catalog(&self) -> Result<CatalogFile> {
        match &self.catalog {
            Some(path) => CatalogFile::load(path),
            None => Ok(CatalogFile::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// CatalogFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub conversion_rules: Vec<ConversionRule>,
    #[serde(default)]
    pub campaigns: Vec<CampaignBonus>,
    #[serde(default)]
    pub rewards: Vec<Reward>,
}

impl CatalogFile {
    /// Parses and validates a catalog. Multipliers are rounded to the
    /// engine's scale before validation.
    pub fn from_toml(text: &str) -> Result<Self> {
        let parsed: CatalogFile = toml::from_str(text).context("invalid catalog")?;
        let rules = parsed.rule_set().normalize();
        rules.validate().context("invalid rule definition")?;
        for reward in &parsed.rewards {
            reward
                .validate()
                .with_context(|| format!("invalid reward {}", reward.id))?;
        }
        Ok(Self {
            conversion_rules: rules.conversion_rules,
            campaigns: rules.campaigns,
            rewards: parsed.rewards,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog from {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet {
            conversion_rules: self.conversion_rules.clone(),
            campaigns: self.campaigns.clone(),
        }
    }
}
