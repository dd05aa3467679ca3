//! Gallery configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::visualizations::VisualizationKind;

/// Errors that can occur while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown visualization `{name}` (available: {available})")]
    UnknownVisualization { name: String, available: String },
    #[error("invalid color `{0}`")]
    InvalidColor(String),
    #[error("invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
}

/// Which visualizations a gallery shows and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Directory searched for assets before the built-in shaders.
    pub asset_root: Option<PathBuf>,
    /// Visualization names in display order.
    pub visualizations: Vec<String>,
    pub clear_color: String,
    /// Overrides each visualization's own animation flag when set.
    pub animate: Option<bool>,
    pub viewport: [u32; 2],
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            asset_root: None,
            visualizations: VisualizationKind::all()
                .iter()
                .map(|kind| kind.name().to_string())
                .collect(),
            clear_color: "#000000".to_string(),
            animate: None,
            viewport: [800, 600],
        }
    }
}

impl GalleryConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kinds()?;
        self.clear_rgba()?;
        let [width, height] = self.viewport;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidViewport { width, height });
        }
        Ok(())
    }

    /// Resolved visualization kinds, in order.
    pub fn kinds(&self) -> Result<Vec<VisualizationKind>, ConfigError> {
        self.visualizations
            .iter()
            .map(|name| {
                VisualizationKind::from_str(name).ok_or_else(|| ConfigError::UnknownVisualization {
                    name: name.clone(),
                    available: VisualizationKind::all()
                        .iter()
                        .map(|kind| kind.name())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            })
            .collect()
    }

    pub fn clear_rgba(&self) -> Result<[f32; 4], ConfigError> {
        parse_hex_color(&self.clear_color)
            .ok_or_else(|| ConfigError::InvalidColor(self.clear_color.clone()))
    }
}

/// Parse hex color to RGBA floats (6-char RGB with opaque alpha, or 8-char RGBA).
pub fn parse_hex_color(hex: &str) -> Option<[f32; 4]> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 && hex.len() != 8 {
        return None;
    }
    let channel = |i: usize| -> Option<f32> {
        Some(u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()? as f32 / 255.0)
    };
    let alpha = if hex.len() == 8 { channel(6)? } else { 1.0 };
    Some([channel(0)?, channel(2)?, channel(4)?, alpha])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff0000"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_hex_color("00ff0000"), Some([0.0, 1.0, 0.0, 0.0]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = GalleryConfig::from_json(r#"{"visualizations": ["points"]}"#).unwrap();
        assert_eq!(config.visualizations, vec!["points"]);
        assert_eq!(config.viewport, [800, 600]);
        assert_eq!(config.clear_rgba().unwrap(), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.animate, None);
    }

    #[test]
    fn test_unknown_visualization() {
        let err = GalleryConfig::from_json(r#"{"visualizations": ["points", "lava-lamp"]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownVisualization { ref name, .. } if name == "lava-lamp"
        ));
    }

    #[test]
    fn test_invalid_color_and_viewport() {
        assert!(matches!(
            GalleryConfig::from_json(r##"{"clear_color": "#12"}"##),
            Err(ConfigError::InvalidColor(_))
        ));
        assert!(matches!(
            GalleryConfig::from_json(r#"{"viewport": [0, 10]}"#),
            Err(ConfigError::InvalidViewport { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, r#"{"viewport": [320, 240], "animate": false}"#).unwrap();
        let config = GalleryConfig::from_file(&path).unwrap();
        assert_eq!(config.viewport, [320, 240]);
        assert_eq!(config.animate, Some(false));
        assert!(matches!(
            GalleryConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
