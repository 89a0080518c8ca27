use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::{serde_as, DurationMilliSeconds};

pub const DEFAULT_ENGINE_URL: &str =
    "https://www.verovio.org/javascript/5.3.2/verovio-toolkit-wasm.js";
pub const DEFAULT_ZOOM: u32 = 20;
pub const DEFAULT_RELAYOUT_DELAY: Duration = Duration::from_millis(100);

pub type EngineOptions = Map<String, Value>;

pub fn default_engine_options() -> EngineOptions {
    let value = json!({
        "breaks": "auto",
        "scale": DEFAULT_ZOOM,
        "spacingStaff": 7,
        "pageHeight": 4500,
        "pageWidth": 4500,
        "footer": "none",
        "header": "none",
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ViewerConfig {
    pub engine_url: String,
    pub source_url: Option<String>,
    pub zoom: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub relayout_delay: Duration,
    pub options: EngineOptions,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            source_url: None,
            zoom: DEFAULT_ZOOM,
            relayout_delay: DEFAULT_RELAYOUT_DELAY,
            options: default_engine_options(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: ViewerConfig =
            toml::from_str(raw).context("failed to decode viewer configuration")?;
        // a partial [options] table only overrides the keys it names
        let mut options = default_engine_options();
        options.extend(std::mem::take(&mut config.options));
        config.options = options;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_engine_option_table() {
        let config = ViewerConfig::default();
        assert_eq!(config.zoom, 20);
        assert_eq!(config.relayout_delay, Duration::from_millis(100));
        assert_eq!(config.options.get("pageWidth"), Some(&json!(4500)));
        assert_eq!(config.options.get("breaks"), Some(&json!("auto")));
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = ViewerConfig::from_toml_str(
            r#"
            zoom = 40
            relayout-delay = 250

            [options]
            pageWidth = 2100
            "#,
        )
        .unwrap();

        assert_eq!(config.zoom, 40);
        assert_eq!(config.relayout_delay, Duration::from_millis(250));
        assert_eq!(config.options.get("pageWidth"), Some(&json!(2100)));
        assert_eq!(config.options.get("pageHeight"), Some(&json!(4500)));
        assert_eq!(config.engine_url, DEFAULT_ENGINE_URL);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.zoom, DEFAULT_ZOOM);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scoreview.toml");
        std::fs::write(&path, "source-url = \"score.mei\"\nzoom = 35\n").unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.source_url.as_deref(), Some("score.mei"));
        assert_eq!(config.zoom, 35);
    }
}
