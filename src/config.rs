use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    pub muted: bool,
    pub volume: f64,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            muted: false,
            volume: 1.0,
        }
    }
}

/// Player settings, stored as RON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub client_name: String,
    /// Substring of the output port name; the first port when unset.
    pub output_port: Option<String>,
    pub click: ClickConfig,
    pub tempo_multiplier: f64,
    /// CSV file receiving the timing trace.
    pub trace: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            client_name: "barloop".into(),
            output_port: None,
            click: ClickConfig::default(),
            tempo_multiplier: 1.0,
            trace: None,
            log_filter: "info".into(),
        }
    }
}

impl PlayerConfig {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let ron_string = fs::read_to_string(path)?;
        Self::parse(&ron_string)
    }

    pub fn parse(ron_string: &str) -> Result<Self> {
        Ok(ron::from_str(ron_string)?)
    }
}
