//! Image-set collaborators for `flipbook-core`: a catalog provider that turns a
//! directory of page images into a book, raster backends for those pages, and
//! an overlay source reading per-page layer files from the same directory.

mod catalog;
mod layers;
mod raster;

pub use catalog::{ImageSetCatalog, ImageSetError, ImageSetProvider, IMAGE_EXTENSIONS};
pub use layers::{FileOverlaySource, ScriptedLayer};
pub use raster::{BlankPage, ImagePage, ImageRasterFactory};
