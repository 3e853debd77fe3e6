use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::error::PageError;

/// Physical properties of one kind of sheet (cover or inner page).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    pub width_texels: u32,
    pub height_texels: u32,
    /// Background color as `0xRRGGBB`.
    pub color: u32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            width_texels: 5 * 210,
            height_texels: 5 * 297,
            color: 0xFF_FF_FF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoResolution {
    pub enabled: bool,
    /// Multiplier applied on top of the fitted viewport size.
    pub k: f32,
}

impl Default for AutoResolution {
    fn default() -> Self {
        Self {
            enabled: false,
            k: 1.0,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Layout width of an overlay layer in CSS pixels.
    pub layer_width: u32,
    /// Delay between content arrival and the first show.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    /// Length of a show/hide transition.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transition_delay: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            layer_width: 1024,
            settle_delay: Duration::from_millis(10),
            transition_delay: Duration::from_millis(150),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub cached_pages: usize,
    pub render_inactive_pages: bool,
    pub render_inactive_pages_on_mobile: bool,
    pub render_while_flipping: bool,
    pub pages_for_predicting: usize,
    pub preload_pages: usize,
    pub rtl: bool,
    pub single_page: bool,
    pub zoom: f32,
    pub loading_animation: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub render_interval: Duration,
    pub auto_resolution: AutoResolution,
    pub cover: SheetConfig,
    pub page: SheetConfig,
    pub overlay: OverlayConfig,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            cached_pages: 50,
            render_inactive_pages: true,
            render_inactive_pages_on_mobile: false,
            render_while_flipping: false,
            pages_for_predicting: 5,
            preload_pages: 5,
            rtl: false,
            single_page: false,
            zoom: 1.0,
            loading_animation: true,
            render_interval: Duration::from_millis(250),
            auto_resolution: AutoResolution::default(),
            cover: SheetConfig::default(),
            page: SheetConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl BookConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, PageError> {
        let raw = fs::read_to_string(path).map_err(|source| PageError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| PageError::ConfigDecode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, PageError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Returns true for the leading and trailing cover pages of a book with
    /// `page_count` pages.
    pub fn is_cover(&self, index: usize, page_count: usize) -> bool {
        index < 2 || index + 2 >= page_count
    }

    pub fn sheet_for(&self, index: usize, page_count: usize) -> &SheetConfig {
        if self.is_cover(index, page_count) {
            &self.cover
        } else {
            &self.page
        }
    }

    /// Maps a displayed page index to the document page it shows.
    pub fn document_page(&self, index: usize, page_count: usize) -> usize {
        if self.rtl {
            page_count.saturating_sub(1).saturating_sub(index)
        } else {
            index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_follow_book_properties() {
        let config = BookConfig::default();
        assert_eq!(config.cached_pages, 50);
        assert!(config.render_inactive_pages);
        assert!(!config.render_inactive_pages_on_mobile);
        assert!(!config.render_while_flipping);
        assert_eq!(config.pages_for_predicting, 5);
        assert_eq!(config.preload_pages, 5);
        assert_eq!(config.render_interval, Duration::from_millis(250));
        assert_eq!(config.page.width_texels, 1050);
        assert_eq!(config.page.height_texels, 1485);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config = BookConfig::from_toml_str(
            r#"
            cached_pages = 8
            rtl = true
            render_interval = 100

            [auto_resolution]
            enabled = true

            [cover]
            color = 0x336699

            [overlay]
            transition_delay = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.cached_pages, 8);
        assert!(config.rtl);
        assert_eq!(config.render_interval, Duration::from_millis(100));
        assert!(config.auto_resolution.enabled);
        assert_eq!(config.auto_resolution.k, 1.0);
        assert_eq!(config.cover.color, 0x336699);
        assert_eq!(config.cover.width_texels, 1050);
        assert_eq!(config.overlay.transition_delay, Duration::from_millis(300));
        assert_eq!(config.overlay.settle_delay, Duration::from_millis(10));
    }

    #[test]
    fn load_or_default_handles_missing_and_invalid_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(
            BookConfig::load_or_default(&missing).unwrap(),
            BookConfig::default()
        );

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "cached_pages = \"many\"").unwrap();
        let err = BookConfig::load_or_default(&broken).unwrap_err();
        assert!(matches!(err, PageError::ConfigDecode { .. }));
    }

    #[test]
    fn covers_and_rtl_mapping() {
        let mut config = BookConfig::default();
        assert!(config.is_cover(0, 12));
        assert!(config.is_cover(1, 12));
        assert!(!config.is_cover(2, 12));
        assert!(!config.is_cover(9, 12));
        assert!(config.is_cover(10, 12));
        assert_eq!(config.document_page(3, 12), 3);
        config.rtl = true;
        assert_eq!(config.document_page(3, 12), 8);
        assert_eq!(config.document_page(11, 12), 0);
    }
}
