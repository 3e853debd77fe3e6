//! Scripted collaborators shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Result};

use crate::backend::{
    BuildRequest, DeferredRaster, PageBitmap, PageCatalog, PageContent, PageDescriptor,
    PageRaster, RasterBackend, RasterFactory, RasterSink, Resolution,
};
use crate::overlay::{LayerContent, LayerSink, OverlaySource};

#[derive(Default)]
pub struct Probe {
    pub builds: Vec<BuildRequest>,
    pub starts: Vec<usize>,
    pub disposed: Vec<usize>,
    pub queries: Vec<(usize, String)>,
    pub resolutions: Vec<(usize, Resolution)>,
    pub sinks: HashMap<usize, RasterSink>,
}

pub type SharedProbe = Rc<RefCell<Probe>>;

impl Probe {
    pub fn build_count(&self, index: usize) -> usize {
        self.builds.iter().filter(|req| req.index == index).count()
    }
}

pub fn ready(probe: &SharedProbe, index: usize) {
    let sink = probe.borrow().sinks.get(&index).cloned();
    sink.expect("page was never built").ready();
}

pub fn complete(probe: &SharedProbe, index: usize) {
    let sink = probe.borrow().sinks.get(&index).cloned();
    sink.expect("page was never built")
        .complete(PageBitmap::filled(2, 2, 0x808080));
}

pub struct FakeRaster {
    index: usize,
    probe: SharedProbe,
}

impl PageRaster for FakeRaster {
    fn set_resolution(&mut self, resolution: Resolution) {
        self.probe
            .borrow_mut()
            .resolutions
            .push((self.index, resolution));
    }

    fn searchable(&self) -> bool {
        true
    }

    fn set_query(&mut self, query: &str) {
        self.probe
            .borrow_mut()
            .queries
            .push((self.index, query.to_owned()));
    }

    fn dispose(&mut self) {
        self.probe.borrow_mut().disposed.push(self.index);
    }
}

impl DeferredRaster for FakeRaster {
    fn start_render(&mut self) {
        self.probe.borrow_mut().starts.push(self.index);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub probe: SharedProbe,
    pub eager: Vec<usize>,
    pub failing: Vec<usize>,
}

impl RasterFactory for FakeFactory {
    fn build(&self, request: BuildRequest, sink: RasterSink) -> Result<RasterBackend> {
        let index = request.index;
        self.probe.borrow_mut().builds.push(request);
        if self.failing.contains(&index) {
            bail!("corrupt page {index}");
        }
        let raster = FakeRaster {
            index,
            probe: Rc::clone(&self.probe),
        };
        if self.eager.contains(&index) {
            sink.ready();
            sink.complete(PageBitmap::filled(1, 1, 0xFFFFFF));
            return Ok(RasterBackend::Eager(Box::new(raster)));
        }
        self.probe.borrow_mut().sinks.insert(index, sink);
        Ok(RasterBackend::Deferred(Box::new(raster)))
    }
}

pub struct FakeCatalog {
    pub pages: usize,
}

impl PageCatalog for FakeCatalog {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn describe(&self, document_page: usize) -> PageDescriptor {
        PageDescriptor {
            content: PageContent::Image {
                path: PathBuf::from(format!("page-{document_page}.png")),
            },
            width_texels: None,
            height_texels: None,
            interactive: false,
        }
    }
}

/// Overlay source that answers immediately with one layer per page listed in
/// `pages`, and with nothing for any other page.
#[derive(Default)]
pub struct FakeOverlays {
    pub pages: Vec<usize>,
    pub failing: Vec<usize>,
    pub fetched: Rc<RefCell<Vec<usize>>>,
}

impl OverlaySource for FakeOverlays {
    fn fetch(&self, document_page: usize, sink: LayerSink) {
        let index = document_page;
        self.fetched.borrow_mut().push(index);
        if self.failing.contains(&index) {
            sink.deliver(Err(anyhow::anyhow!("overlay server unavailable")));
        } else if self.pages.contains(&index) {
            sink.deliver(Ok(vec![LayerContent::new(
                format!("<div>page {index}</div>"),
                "div { color: red }",
            )]));
        } else {
            sink.deliver(Ok(Vec::new()));
        }
    }
}
