pub mod backend;
pub mod book;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod overlay;
pub mod placeholder;
pub mod predictor;
pub mod scheduler;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use uuid::Uuid;

pub use backend::{
    BuildRequest, DeferredRaster, Generation, PageBitmap, PageCatalog, PageContent,
    PageDescriptor, PageEvent, PageRaster, RasterBackend, RasterFactory, RasterSink, Resolution,
};
pub use book::{facing_pages, BookContext, BookState};
pub use cache::{BoundedCache, Dispose};
pub use config::{AutoResolution, BookConfig, OverlayConfig, SheetConfig};
pub use error::PageError;
pub use manager::{PageEntry, PageManager, PageNotice, PageState, SlotId, SlotView, Viewport};
pub use overlay::{
    LayerBehavior, LayerContent, LayerSink, OverlayLayer, OverlaySource, OverlayState,
    OverlaySynchronizer, TransitionHandle,
};
pub use placeholder::{LoadingAnimation, PlaceholderSet};
pub use predictor::{NavigationHistory, NavigationPredictor, StepPredictor};
pub use scheduler::{Priority, RenderScheduler, SchedulePolicy};

pub type BookId = Uuid;

static BOOK_NAMESPACE: Lazy<Uuid> =
    Lazy::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"flipbook:book"));

/// Stable identifier for the book stored at `path`, derived from its
/// canonical location.
pub fn book_id_for_path(path: &Path) -> BookId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&BOOK_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone)]
pub struct BookInfo {
    pub id: BookId,
    pub path: PathBuf,
    pub page_count: usize,
}

/// Opens page sources. Implementations live in the backend crates.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<(BookInfo, Arc<dyn PageCatalog>)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn book_id_is_stable_per_location() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();

        assert_eq!(book_id_for_path(&a), book_id_for_path(&a));
        assert_ne!(book_id_for_path(&a), book_id_for_path(&b));
        assert_eq!(book_id_for_path(&a), book_id_for_path(&a.join("..").join("a")));
    }

    #[tokio::test]
    async fn provider_trait_is_object_safe() {
        struct Fixed;

        struct Catalog;

        impl PageCatalog for Catalog {
            fn page_count(&self) -> usize {
                2
            }

            fn describe(&self, _document_page: usize) -> PageDescriptor {
                PageDescriptor::blank()
            }
        }

        #[async_trait]
        impl CatalogProvider for Fixed {
            async fn open(&self, path: &Path) -> Result<(BookInfo, Arc<dyn PageCatalog>)> {
                let info = BookInfo {
                    id: book_id_for_path(path),
                    path: path.to_path_buf(),
                    page_count: 2,
                };
                Ok((info, Arc::new(Catalog)))
            }
        }

        let provider: Box<dyn CatalogProvider> = Box::new(Fixed);
        let (info, catalog) = provider.open(Path::new("book")).await.unwrap();
        assert_eq!(info.page_count, catalog.page_count());
        assert_eq!(info.id, book_id_for_path(Path::new("book")));
    }
}
