use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flipbook_core::{LayerBehavior, LayerContent, LayerSink, OverlaySource};
use tracing::{debug, trace};

fn layer_file(dir: &Path, document_page: usize, extension: &str) -> PathBuf {
    dir.join(format!("{}.{extension}", document_page + 1))
}

/// Whether `document_page` has an overlay markup file in `dir`.
pub(crate) fn has_layer(dir: &Path, document_page: usize) -> bool {
    layer_file(dir, document_page, "html").is_file()
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {:?}", path)),
    }
}

/// Overlay content stored beside the page images as `<n>.html`, with optional
/// `<n>.css` and `<n>.js`, where `n` is the 1-based page number.
#[derive(Debug, Clone)]
pub struct FileOverlaySource {
    dir: PathBuf,
}

impl FileOverlaySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reads the layer of `document_page`. Pages without markup have none.
    pub fn load(&self, document_page: usize) -> Result<Vec<LayerContent>> {
        let Some(markup) = read_optional(&layer_file(&self.dir, document_page, "html"))? else {
            return Ok(Vec::new());
        };
        let style = read_optional(&layer_file(&self.dir, document_page, "css"))?
            .unwrap_or_default();
        let mut content = LayerContent::new(markup, style);
        if let Some(script) = read_optional(&layer_file(&self.dir, document_page, "js"))? {
            content = content.with_behavior(Box::new(ScriptedLayer::new(document_page, script)));
        }
        Ok(vec![content])
    }
}

impl OverlaySource for FileOverlaySource {
    fn fetch(&self, document_page: usize, sink: LayerSink) {
        let source = self.clone();
        rayon::spawn(move || {
            let result = source.load(document_page);
            debug!(
                page = sink.index(),
                document_page,
                ok = result.is_ok(),
                "overlay content loaded"
            );
            sink.deliver(result);
        });
    }
}

/// Layer whose behavior is a script body shipped with the page. Scripts are
/// not evaluated here; the host sees every hook in the trace log.
#[derive(Debug, Clone)]
pub struct ScriptedLayer {
    document_page: usize,
    script: String,
}

impl ScriptedLayer {
    pub fn new(document_page: usize, script: String) -> Self {
        Self {
            document_page,
            script,
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    fn hook(&self, name: &'static str) {
        trace!(document_page = self.document_page, hook = name, "layer script hook");
    }
}

impl LayerBehavior for ScriptedLayer {
    fn on_show(&mut self) {
        self.hook("show");
    }

    fn on_shown(&mut self) {
        self.hook("shown");
    }

    fn on_hide(&mut self) {
        self.hook("hide");
    }

    fn on_hidden(&mut self) {
        self.hook("hidden");
    }

    fn dispose(&mut self) {
        self.hook("dispose");
        self.script.clear();
    }
}
