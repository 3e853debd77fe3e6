use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use flipbook_core::{
    BuildRequest, DeferredRaster, PageBitmap, PageContent, PageRaster, RasterBackend,
    RasterFactory, RasterSink, Resolution,
};
use image::imageops::FilterType;
use image::DynamicImage;
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Builds image pages as deferred backends and blank pages as eager ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRasterFactory;

impl RasterFactory for ImageRasterFactory {
    #[instrument(skip_all, fields(page = request.index))]
    fn build(&self, request: BuildRequest, sink: RasterSink) -> Result<RasterBackend> {
        match request.descriptor.content {
            PageContent::Image { path } => {
                if !path.is_file() {
                    bail!("page image {:?} is missing", path);
                }
                let page = ImagePage::open(path, request.resolution, sink);
                Ok(RasterBackend::Deferred(Box::new(page)))
            }
            PageContent::Blank => {
                let page = BlankPage::new(request.color, request.resolution, sink);
                Ok(RasterBackend::Eager(Box::new(page)))
            }
        }
    }
}

/// A page image decoded in the background and scaled on demand.
///
/// Decoding starts as soon as the page is built and reports readiness; each
/// render resamples the decoded image to the current resolution.
pub struct ImagePage {
    path: PathBuf,
    resolution: Resolution,
    decoded: Arc<Mutex<Option<DynamicImage>>>,
    released: Arc<AtomicBool>,
    sink: RasterSink,
}

impl ImagePage {
    fn open(path: PathBuf, resolution: Resolution, sink: RasterSink) -> Self {
        let decoded = Arc::new(Mutex::new(None));
        let released = Arc::new(AtomicBool::new(false));
        {
            let path = path.clone();
            let decoded = Arc::clone(&decoded);
            let released = Arc::clone(&released);
            let sink = sink.clone();
            rayon::spawn(move || {
                let result = image::open(&path)
                    .with_context(|| format!("failed to decode {:?}", path));
                if released.load(Ordering::Acquire) {
                    return;
                }
                match result {
                    Ok(image) => {
                        *decoded.lock() = Some(image);
                        sink.ready();
                    }
                    Err(err) => sink.failed(err),
                }
            });
        }
        Self {
            path,
            resolution,
            decoded,
            released,
            sink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageRaster for ImagePage {
    fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    fn dispose(&mut self) {
        self.released.store(true, Ordering::Release);
        self.decoded.lock().take();
    }
}

impl DeferredRaster for ImagePage {
    fn start_render(&mut self) {
        let (width, height) = self.resolution.pixels();
        let decoded = Arc::clone(&self.decoded);
        let released = Arc::clone(&self.released);
        let sink = self.sink.clone();
        debug!(page = sink.index(), width, height, "scaling page image");
        rayon::spawn(move || {
            let scaled = decoded
                .lock()
                .as_ref()
                .map(|image| image.resize_exact(width, height, FilterType::Triangle));
            if released.load(Ordering::Acquire) {
                return;
            }
            match scaled {
                Some(image) => {
                    let rgba = image.to_rgba8();
                    sink.complete(PageBitmap {
                        width: rgba.width(),
                        height: rgba.height(),
                        pixels: rgba.into_raw(),
                    });
                }
                None => sink.failed(anyhow!("page image is not decoded")),
            }
        });
    }
}

/// A page with no content, filled with its sheet color.
pub struct BlankPage {
    color: u32,
    resolution: Resolution,
}

impl BlankPage {
    fn new(color: u32, resolution: Resolution, sink: RasterSink) -> Self {
        let page = Self { color, resolution };
        sink.ready();
        sink.complete(page.bitmap());
        page
    }

    fn bitmap(&self) -> PageBitmap {
        let (width, height) = self.resolution.pixels();
        PageBitmap::filled(width, height, self.color)
    }
}

impl PageRaster for BlankPage {
    fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    fn dispose(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipbook_core::{Generation, PageDescriptor, PageEvent};
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn request(index: usize, content: PageContent, resolution: Resolution) -> BuildRequest {
        BuildRequest {
            index,
            document_page: index,
            descriptor: PageDescriptor {
                content,
                width_texels: None,
                height_texels: None,
                interactive: false,
            },
            resolution,
            color: 0x336699,
        }
    }

    fn channel(index: usize) -> (RasterSink, UnboundedReceiver<PageEvent>) {
        let (tx, rx) = unbounded_channel();
        (RasterSink::new(index, Generation(1), tx), rx)
    }

    #[test]
    fn image_page_decodes_then_scales_on_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.png");
        RgbImage::from_pixel(40, 60, Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();

        let (sink, mut rx) = channel(3);
        let mut backend = ImageRasterFactory
            .build(
                request(3, PageContent::Image { path }, Resolution::new(20.0, 30.0)),
                sink,
            )
            .unwrap();
        assert!(backend.supports_deferred_start());
        assert!(matches!(
            rx.blocking_recv(),
            Some(PageEvent::Ready { index: 3, .. })
        ));

        backend.raster_mut().set_resolution(Resolution::new(10.0, 15.0));
        assert!(backend.start_render());
        match rx.blocking_recv() {
            Some(PageEvent::RasterComplete { bitmap, .. }) => {
                assert_eq!((bitmap.width, bitmap.height), (10, 15));
                assert_eq!(&bitmap.pixels[..4], &[200, 10, 10, 255]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn corrupt_image_reports_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let (sink, mut rx) = channel(0);
        ImageRasterFactory
            .build(
                request(0, PageContent::Image { path }, Resolution::new(1.0, 1.0)),
                sink,
            )
            .unwrap();
        assert!(matches!(
            rx.blocking_recv(),
            Some(PageEvent::Failed { index: 0, .. })
        ));
    }

    #[test]
    fn missing_image_fails_construction() {
        let dir = tempdir().unwrap();
        let (sink, _rx) = channel(0);
        let path = dir.path().join("gone.png");
        let result = ImageRasterFactory.build(
            request(0, PageContent::Image { path }, Resolution::new(1.0, 1.0)),
            sink,
        );
        assert!(result.is_err());
    }

    #[test]
    fn blank_page_completes_while_building() {
        let (sink, mut rx) = channel(7);
        let backend = ImageRasterFactory
            .build(
                request(7, PageContent::Blank, Resolution::new(4.0, 2.0)),
                sink,
            )
            .unwrap();
        assert!(!backend.supports_deferred_start());
        assert!(matches!(rx.try_recv(), Ok(PageEvent::Ready { index: 7, .. })));
        match rx.try_recv() {
            Ok(PageEvent::RasterComplete { bitmap, .. }) => {
                assert_eq!((bitmap.width, bitmap.height), (4, 2));
                assert_eq!(&bitmap.pixels[..4], &[0x33, 0x66, 0x99, 255]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
