use std::path::PathBuf;

/// Failures the page lifecycle can observe. None of these are returned to the
/// rendering consumer; they are logged and isolated to the affected page.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("page {index} could not be constructed: {reason}")]
    Construction { index: usize, reason: String },

    #[error("page {index} failed to rasterize: {reason}")]
    Raster { index: usize, reason: String },

    #[error("overlay content for page {index} could not be fetched: {reason}")]
    OverlayFetch { index: usize, reason: String },

    #[error("failed to read config {path:?}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode config {path:?}")]
    ConfigDecode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl PageError {
    pub fn construction(index: usize, err: &anyhow::Error) -> Self {
        Self::Construction {
            index,
            reason: format!("{err:#}"),
        }
    }

    pub fn raster(index: usize, err: &anyhow::Error) -> Self {
        Self::Raster {
            index,
            reason: format!("{err:#}"),
        }
    }

    pub fn overlay_fetch(index: usize, err: &anyhow::Error) -> Self {
        Self::OverlayFetch {
            index,
            reason: format!("{err:#}"),
        }
    }

    /// Page the failure belongs to, if any.
    pub fn page(&self) -> Option<usize> {
        match self {
            Self::Construction { index, .. }
            | Self::Raster { index, .. }
            | Self::OverlayFetch { index, .. } => Some(*index),
            Self::ConfigRead { .. } | Self::ConfigDecode { .. } => None,
        }
    }
}
