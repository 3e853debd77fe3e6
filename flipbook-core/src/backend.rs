//! Interfaces to the per-page rasterization collaborators.

use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;

use crate::overlay::LayerContent;

/// Token identifying one incarnation of a page entry. A resumption is only
/// honoured while the entry it captured is still the live one for its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub width: f32,
    pub height: f32,
}

impl Resolution {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Integer pixel size, never smaller than one pixel per side.
    pub fn pixels(&self) -> (u32, u32) {
        let clamp = |value: f32| {
            if !value.is_finite() || value < 1.0 {
                1
            } else if value > u32::MAX as f32 {
                u32::MAX
            } else {
                value.round() as u32
            }
        };
        (clamp(self.width), clamp(self.height))
    }
}

/// A finished page raster in RGBA8.
#[derive(Debug, Clone)]
pub struct PageBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PageBitmap {
    pub fn filled(width: u32, height: u32, color: u32) -> Self {
        let [_, r, g, b] = color.to_be_bytes();
        let pixels = [r, g, b, 255].repeat(width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageContent {
    Image { path: PathBuf },
    Blank,
}

/// What the document says about one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDescriptor {
    pub content: PageContent,
    /// Overrides the sheet's texel size when known.
    pub width_texels: Option<u32>,
    pub height_texels: Option<u32>,
    pub interactive: bool,
}

impl PageDescriptor {
    pub fn blank() -> Self {
        Self {
            content: PageContent::Blank,
            width_texels: None,
            height_texels: None,
            interactive: false,
        }
    }
}

pub trait PageCatalog: Send + Sync {
    fn page_count(&self) -> usize;
    fn describe(&self, document_page: usize) -> PageDescriptor;
}

/// Everything a backend needs to start producing a page.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub index: usize,
    pub document_page: usize,
    pub descriptor: PageDescriptor,
    pub resolution: Resolution,
    pub color: u32,
}

/// Notifications flowing back into the manager. Each carries the generation of
/// the entry it was issued for.
#[derive(Debug)]
pub enum PageEvent {
    Ready {
        index: usize,
        generation: Generation,
    },
    RasterComplete {
        index: usize,
        generation: Generation,
        bitmap: PageBitmap,
    },
    Failed {
        index: usize,
        generation: Generation,
        error: anyhow::Error,
    },
    LayersFetched {
        index: usize,
        result: Result<Vec<LayerContent>>,
    },
}

/// Handle a backend uses to report progress for one entry.
#[derive(Debug, Clone)]
pub struct RasterSink {
    index: usize,
    generation: Generation,
    events: UnboundedSender<PageEvent>,
}

impl RasterSink {
    /// Sinks are normally handed out by the manager; hosts driving a backend
    /// directly create their own.
    pub fn new(
        index: usize,
        generation: Generation,
        events: UnboundedSender<PageEvent>,
    ) -> Self {
        Self {
            index,
            generation,
            events,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// First content is available; the page may be queued for rendering.
    pub fn ready(&self) {
        self.send(PageEvent::Ready {
            index: self.index,
            generation: self.generation,
        });
    }

    pub fn complete(&self, bitmap: PageBitmap) {
        self.send(PageEvent::RasterComplete {
            index: self.index,
            generation: self.generation,
            bitmap,
        });
    }

    pub fn failed(&self, error: anyhow::Error) {
        self.send(PageEvent::Failed {
            index: self.index,
            generation: self.generation,
            error,
        });
    }

    fn send(&self, event: PageEvent) {
        // A closed channel means the manager is gone; nothing is waiting.
        let _ = self.events.send(event);
    }
}

/// Operations every raster backend supports.
pub trait PageRaster {
    fn set_resolution(&mut self, resolution: Resolution);

    /// Whether this backend highlights search hits.
    fn searchable(&self) -> bool {
        false
    }

    fn set_query(&mut self, _query: &str) {}

    fn dispose(&mut self);
}

/// A backend that waits for the scheduler before drawing.
pub trait DeferredRaster: PageRaster {
    fn start_render(&mut self);
}

pub enum RasterBackend {
    /// Draws on its own as soon as it is built.
    Eager(Box<dyn PageRaster>),
    /// Draws only when the scheduler grants it the render slot.
    Deferred(Box<dyn DeferredRaster>),
}

impl RasterBackend {
    pub fn supports_deferred_start(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn raster_mut(&mut self) -> &mut dyn PageRaster {
        match self {
            Self::Eager(raster) => raster.as_mut(),
            Self::Deferred(raster) => raster.as_mut(),
        }
    }

    /// Starts a deferred render. Returns false for eager backends.
    pub fn start_render(&mut self) -> bool {
        match self {
            Self::Eager(_) => false,
            Self::Deferred(raster) => {
                raster.start_render();
                true
            }
        }
    }
}

impl std::fmt::Debug for RasterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager(_) => f.write_str("RasterBackend::Eager"),
            Self::Deferred(_) => f.write_str("RasterBackend::Deferred"),
        }
    }
}

pub trait RasterFactory {
    fn build(&self, request: BuildRequest, sink: RasterSink) -> Result<RasterBackend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_pixels_are_clamped() {
        assert_eq!(Resolution::new(10.4, 0.2).pixels(), (10, 1));
        assert_eq!(Resolution::new(f32::NAN, 3.6).pixels(), (1, 4));
    }

    #[test]
    fn filled_bitmap_uses_sheet_color() {
        let bitmap = PageBitmap::filled(2, 1, 0x336699);
        assert_eq!(bitmap.pixels, vec![0x33, 0x66, 0x99, 255, 0x33, 0x66, 0x99, 255]);
    }

    #[test]
    fn sink_reports_with_its_generation() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = RasterSink::new(3, Generation(9), tx);
        sink.ready();
        match rx.try_recv().unwrap() {
            PageEvent::Ready { index, generation } => {
                assert_eq!(index, 3);
                assert_eq!(generation, Generation(9));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
