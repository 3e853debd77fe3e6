use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flipbook_core::{
    book_id_for_path, BookInfo, CatalogProvider, PageCatalog, PageContent, PageDescriptor,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::layers;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum ImageSetError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("no page images found in {}", .0.display())]
    Empty(PathBuf),
}

/// Pages of a book backed by a directory of images, in file name order.
///
/// A book with an odd number of images gets a trailing blank page so the back
/// cover closes the book.
#[derive(Debug, Clone)]
pub struct ImageSetCatalog {
    dir: PathBuf,
    pages: Vec<PageDescriptor>,
}

impl ImageSetCatalog {
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn scan(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ImageSetError::NotADirectory(dir.to_path_buf()).into());
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("failed to list {:?}", dir))? {
            let path = entry?.path();
            if is_page_image(&path) {
                images.push(path);
            }
        }
        images.sort();
        if images.is_empty() {
            return Err(ImageSetError::Empty(dir.to_path_buf()).into());
        }

        let mut pages: Vec<PageDescriptor> = images
            .into_iter()
            .enumerate()
            .map(|(index, path)| describe_image(dir, index, path))
            .collect();
        if pages.len() % 2 == 1 {
            pages.push(PageDescriptor::blank());
        }
        info!(pages = pages.len(), "scanned image set");
        Ok(Self {
            dir: dir.to_path_buf(),
            pages,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PageCatalog for ImageSetCatalog {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn describe(&self, document_page: usize) -> PageDescriptor {
        self.pages
            .get(document_page)
            .cloned()
            .unwrap_or_else(PageDescriptor::blank)
    }
}

fn is_page_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
}

fn describe_image(dir: &Path, index: usize, path: PathBuf) -> PageDescriptor {
    let (width_texels, height_texels) = match image::image_dimensions(&path) {
        Ok((width, height)) => (Some(width), Some(height)),
        Err(err) => {
            // Decoding will fail again later and keep the placeholder up.
            warn!(path = %path.display(), error = %err, "unreadable page image");
            (None, None)
        }
    };
    let interactive = layers::has_layer(dir, index);
    debug!(page = index, path = %path.display(), interactive, "page image");
    PageDescriptor {
        content: PageContent::Image { path },
        width_texels,
        height_texels,
        interactive,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageSetProvider;

#[async_trait]
impl CatalogProvider for ImageSetProvider {
    async fn open(&self, path: &Path) -> Result<(BookInfo, Arc<dyn PageCatalog>)> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let catalog = ImageSetCatalog::scan(&absolute)?;
        let info = BookInfo {
            id: book_id_for_path(&absolute),
            path: absolute,
            page_count: catalog.page_count(),
        };
        Ok((info, Arc::new(catalog)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_page(dir: &Path, name: &str, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn pages_follow_file_name_order() {
        let dir = tempdir().unwrap();
        write_page(dir.path(), "002.png", 4, 6);
        write_page(dir.path(), "001.png", 8, 12);
        fs::write(dir.path().join("notes.txt"), "not a page").unwrap();

        let catalog = ImageSetCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.page_count(), 2);
        let first = catalog.describe(0);
        assert_eq!(first.width_texels, Some(8));
        assert_eq!(first.height_texels, Some(12));
        assert!(matches!(
            first.content,
            PageContent::Image { ref path } if path.ends_with("001.png")
        ));
    }

    #[test]
    fn odd_books_get_a_blank_back_page() {
        let dir = tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            write_page(dir.path(), name, 2, 2);
        }
        let catalog = ImageSetCatalog::scan(dir.path()).unwrap();
        assert_eq!(catalog.page_count(), 4);
        assert_eq!(catalog.describe(3), PageDescriptor::blank());
        assert_eq!(catalog.describe(99), PageDescriptor::blank());
    }

    #[test]
    fn pages_with_layer_files_are_interactive() {
        let dir = tempdir().unwrap();
        write_page(dir.path(), "a.png", 2, 2);
        write_page(dir.path(), "b.png", 2, 2);
        fs::write(dir.path().join("2.html"), "<p>quiz</p>").unwrap();

        let catalog = ImageSetCatalog::scan(dir.path()).unwrap();
        assert!(!catalog.describe(0).interactive);
        assert!(catalog.describe(1).interactive);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let err = ImageSetCatalog::scan(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImageSetError>(),
            Some(ImageSetError::Empty(_))
        ));
    }

    #[tokio::test]
    async fn provider_opens_directory() {
        let dir = tempdir().unwrap();
        write_page(dir.path(), "cover.jpg", 2, 2);
        write_page(dir.path(), "back.jpg", 2, 2);

        let (info, catalog) = ImageSetProvider.open(dir.path()).await.unwrap();
        assert_eq!(info.page_count, 2);
        assert_eq!(catalog.page_count(), 2);
        assert_eq!(info.id, book_id_for_path(dir.path()));
    }
}
