//! Engine configuration, loaded from TOML with per-field defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::budget::DEFAULT_PIXEL_COST_BYTES;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Path to the ONNX model. May instead come from the CLI.
    pub model: Option<PathBuf>,
    /// The model's fixed integer scale factor.
    pub scale: usize,
    /// Device selector (`cpu`, `cuda`, `cuda:N`, `mps`); auto-detect
    /// when absent.
    pub device: Option<String>,
    /// Context padding around each tile.
    pub tile_pad: usize,
    /// Base reflection padding around the whole input.
    pub pad: usize,
    /// Estimated peak-memory cost per pixel·channel, in KiB.
    pub pixel_cost_kb: u64,
    /// When false, skip the memory estimate and run one pass.
    pub calc_tiles: bool,
    /// Fixed memory budget in MiB, replacing the device probe.
    /// Required for MPS, which has no portable free-memory query.
    pub memory_limit_mb: Option<u64>,
    /// `network` or `resize`.
    pub alpha_mode: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            scale: 4,
            device: None,
            tile_pad: 10,
            pad: 10,
            pixel_cost_kb: DEFAULT_PIXEL_COST_BYTES / 1024,
            calc_tiles: true,
            memory_limit_mb: None,
            alpha_mode: "network".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn pixel_cost_bytes(&self) -> u64 {
        self.pixel_cost_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.scale, 4);
        assert_eq!(config.tile_pad, 10);
        assert_eq!(config.pad, 10);
        assert_eq!(config.pixel_cost_bytes(), DEFAULT_PIXEL_COST_BYTES);
        assert!(config.calc_tiles);
        assert_eq!(config.alpha_mode, "network");
        assert!(config.model.is_none());
        assert!(config.device.is_none());
        assert!(config.memory_limit_mb.is_none());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            scale = 2
            device = "cuda:1"
            pixel_cost_kb = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.scale, 2);
        assert_eq!(config.device.as_deref(), Some("cuda:1"));
        assert_eq!(config.pixel_cost_bytes(), 25 * 1024);
        assert_eq!(config.tile_pad, 10);
    }

    #[test]
    fn unknown_field_is_a_configuration_error() {
        let result = EngineConfig::from_toml_str("tile_size = 400");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scale = 1\nalpha_mode = \"resize\"").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.scale, 1);
        assert_eq!(config.alpha_mode, "resize");
    }

    #[test]
    fn load_reports_missing_file() {
        let result = EngineConfig::load(Path::new("/nonexistent/upres.toml"));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
