//! Configuration types

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use dropcraft_core::{parse_amount, Amount, MAX_DECIMALS};
use dropcraft_normalizer::NormalizeParams;

use crate::{default_settings_path, expand_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub smoothing: SmoothingSettings,

    /// Contribution sources, merged in order
    #[serde(default)]
    pub sources: Vec<SourceSettings>,

    /// Files listing addresses paid in earlier airdrops
    #[serde(default)]
    pub exclude: Vec<PathBuf>,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings = serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Expand `~` and anchor relative paths at the settings file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        let expanded = expand_path(path);
        if expanded.is_absolute() {
            return expanded;
        }
        match self.config_path.as_deref().and_then(Path::parent) {
            Some(base) => base.join(expanded),
            None => expanded,
        }
    }

    pub fn document_path(&self) -> PathBuf {
        self.resolve_path(&self.output.dir.join(&self.output.document))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve_path(&self.output.dir.join(&self.output.ledger))
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.dir.join("checkpoints"))
    }

    /// Check everything a run needs before any work starts.
    pub fn validate(&self) -> Result<()> {
        self.smoothing.params()?;
        if self.sources.is_empty() {
            return Err(SettingsError::InvalidValue {
                field: "sources".to_string(),
                reason: "at least one source is required".to_string(),
            });
        }
        let mut names = BTreeSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(SettingsError::InvalidValue {
                    field: "sources".to_string(),
                    reason: format!("duplicate source name {}", source.name),
                });
            }
            source.budget_amount()?;
        }
        Ok(())
    }
}

/// Smoothing parameters as decimal strings of token base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingSettings {
    #[serde(default = "default_threshold")]
    pub threshold: String,

    #[serde(default = "default_surplus_band")]
    pub surplus_band: String,

    /// Token decimals, for human-readable logs
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

/// 20 tokens at 18 decimals
fn default_threshold() -> String {
    "20000000000000000000".to_string()
}

/// 5 tokens at 18 decimals
fn default_surplus_band() -> String {
    "5000000000000000000".to_string()
}

fn default_decimals() -> u32 {
    18
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            surplus_band: default_surplus_band(),
            decimals: default_decimals(),
        }
    }
}

impl SmoothingSettings {
    pub fn params(&self) -> Result<NormalizeParams> {
        if self.decimals > MAX_DECIMALS {
            return Err(SettingsError::InvalidValue {
                field: "smoothing.decimals".to_string(),
                reason: format!("{} exceeds the maximum of {}", self.decimals, MAX_DECIMALS),
            });
        }
        Ok(NormalizeParams::new(
            parse_field("smoothing.threshold", &self.threshold)?,
            parse_field("smoothing.surplus_band", &self.surplus_band)?,
        ))
    }
}

fn parse_field(field: &str, value: &str) -> Result<Amount> {
    parse_amount(value).map_err(|e| SettingsError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// How a source file is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// `{ address: amount }` JSON object
    #[default]
    Contributions,
    /// Transaction call records, decoded by selector
    Calls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    pub name: String,

    pub file: PathBuf,

    #[serde(default)]
    pub format: SourceFormat,

    /// Scale this source to exactly this many base units before merging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
}

impl SourceSettings {
    pub fn budget_amount(&self) -> Result<Option<Amount>> {
        self.budget
            .as_deref()
            .map(|b| parse_field(&format!("sources.{}.budget", self.name), b))
            .transpose()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_document")]
    pub document: String,

    #[serde(default = "default_ledger")]
    pub ledger: String,

    /// Reuse intermediate results from earlier runs
    #[serde(default = "default_true")]
    pub checkpoints: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("airdrop")
}

fn default_document() -> String {
    "distribution.json".to_string()
}

fn default_ledger() -> String {
    "ledger.jsonl".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            document: default_document(),
            ledger: default_ledger(),
            checkpoints: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_level() }
    }
}
