//! Page resource lifecycle.
//!
//! A [`PageManager`] owns one [`PageEntry`] per cached page index and walks it
//! through `Loading -> QueuedForRender -> Rendering -> Active`. Construction is
//! deferred to [`PageManager::pump`]; rendering is started one page at a time by
//! [`PageManager::tick`]. Every deferred step carries the entry's generation and
//! is dropped once that entry has been disposed or replaced.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    BuildRequest, Generation, PageBitmap, PageCatalog, PageEvent, RasterBackend, RasterFactory,
    RasterSink, Resolution,
};
use crate::book::BookContext;
use crate::cache::{BoundedCache, Dispose};
use crate::config::BookConfig;
use crate::error::PageError;
use crate::overlay::{LayerContent, LayerSink, OverlaySource};
use crate::placeholder::PlaceholderSet;
use crate::predictor::{NavigationHistory, NavigationPredictor, StepPredictor};
use crate::scheduler::{RenderScheduler, SchedulePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Loading,
    QueuedForRender,
    Rendering,
    Active,
}

/// Opaque render target a page texture is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub device_pixel_ratio: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl Viewport {
    pub fn is_mobile(&self) -> bool {
        self.device_pixel_ratio > 1.0
    }
}

/// Events the host may forward to its own listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNotice {
    LoadPage { index: usize },
    LoadedPage { index: usize },
}

/// What a render target should currently display.
#[derive(Debug, Clone, Copy)]
pub enum SlotView<'a> {
    Texture { index: usize, bitmap: &'a PageBitmap },
    Loading { color: u32, frame: usize },
    Flat { color: u32 },
}

#[derive(Debug)]
enum Pending {
    Query(String),
    Layers(Vec<LayerContent>),
}

#[derive(Debug)]
pub struct PageEntry {
    index: usize,
    state: PageState,
    generation: Generation,
    color: u32,
    width_texels: u32,
    height_texels: u32,
    resolution: Resolution,
    interactive: bool,
    backend: Option<RasterBackend>,
    texture: Option<PageBitmap>,
    material: Option<SlotId>,
    pending: VecDeque<Pending>,
}

impl PageEntry {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_constructed(&self) -> bool {
        self.backend.is_some()
    }

    pub fn texture(&self) -> Option<&PageBitmap> {
        self.texture.as_ref()
    }

    pub fn material(&self) -> Option<SlotId> {
        self.material
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Dispose for PageEntry {
    fn dispose(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.raster_mut().dispose();
        }
        self.texture = None;
        self.material = None;
        self.pending.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Construct { index: usize, generation: Generation },
    Prefetch,
}

/// Hands `query` to the page's raster. Returns false when the page has no
/// searchable raster.
fn apply_query(entry: &mut PageEntry, query: &str) -> bool {
    let Some(backend) = entry.backend.as_mut() else {
        return false;
    };
    let raster = backend.raster_mut();
    if !raster.searchable() {
        return false;
    }
    raster.set_query(query);
    true
}

fn is_locked(
    book: &dyn BookContext,
    in_flight: Option<usize>,
    index: &usize,
    entry: &PageEntry,
) -> bool {
    matches!(entry.state, PageState::Loading | PageState::Rendering)
        || in_flight == Some(*index)
        || book.is_active_page(*index)
}

pub struct PageManager {
    config: BookConfig,
    catalog: Arc<dyn PageCatalog>,
    factory: Box<dyn RasterFactory>,
    overlays: Option<Box<dyn OverlaySource>>,
    predictor: Box<dyn NavigationPredictor>,
    cache: BoundedCache<usize, PageEntry>,
    scheduler: RenderScheduler,
    history: NavigationHistory,
    predicted: Vec<usize>,
    tasks: VecDeque<Task>,
    events_tx: UnboundedSender<PageEvent>,
    events_rx: UnboundedReceiver<PageEvent>,
    notices: Vec<PageNotice>,
    layer_deliveries: Vec<(usize, Vec<LayerContent>)>,
    placeholders: PlaceholderSet,
    loading_animation: bool,
    query: String,
    viewport: Viewport,
    next_generation: u64,
    disposed: bool,
}

impl PageManager {
    pub fn new(
        config: BookConfig,
        catalog: Arc<dyn PageCatalog>,
        factory: Box<dyn RasterFactory>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            cache: BoundedCache::new(config.cached_pages),
            scheduler: RenderScheduler::new(SchedulePolicy::from_config(&config)),
            history: NavigationHistory::new(config.pages_for_predicting),
            placeholders: PlaceholderSet::new(&config.cover, &config.page),
            loading_animation: config.loading_animation,
            config,
            catalog,
            factory,
            overlays: None,
            predictor: Box::new(StepPredictor),
            predicted: Vec::new(),
            tasks: VecDeque::new(),
            events_tx,
            events_rx,
            notices: Vec::new(),
            layer_deliveries: Vec::new(),
            query: String::new(),
            viewport: Viewport::default(),
            next_generation: 0,
            disposed: false,
        }
    }

    pub fn with_overlay_source(mut self, source: Box<dyn OverlaySource>) -> Self {
        self.overlays = Some(source);
        self
    }

    pub fn with_predictor(mut self, predictor: Box<dyn NavigationPredictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn PageCatalog> {
        &self.catalog
    }

    pub fn entry(&self, index: usize) -> Option<&PageEntry> {
        self.cache.get(&index)
    }

    pub fn page_state(&self, index: usize) -> Option<PageState> {
        self.cache.get(&index).map(PageEntry::state)
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        self.cache.keys()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn render_queue(&self) -> Vec<usize> {
        self.scheduler.queued()
    }

    pub fn rendering(&self) -> Option<usize> {
        self.scheduler.in_flight().map(|item| item.index)
    }

    pub fn history(&self) -> Vec<usize> {
        self.history.to_vec()
    }

    pub fn predicted(&self) -> &[usize] {
        &self.predicted
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Book notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<PageNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Overlay content released to consumers since the last call.
    pub fn take_layer_deliveries(&mut self) -> Vec<(usize, Vec<LayerContent>)> {
        std::mem::take(&mut self.layer_deliveries)
    }

    /// Returns the entry for `index`, creating it when absent. A given `slot`
    /// is detached from whichever entry held it before.
    pub fn get_or_load(
        &mut self,
        book: &dyn BookContext,
        index: usize,
        slot: Option<SlotId>,
    ) -> Option<&PageEntry> {
        if self.disposed {
            debug!(page = index, "request after dispose ignored");
            return None;
        }
        if self.cache.contains(&index) {
            if let Some(slot) = slot {
                self.bind_slot(index, slot);
            }
        } else {
            self.load(book, index, slot);
            self.record_request(index);
        }
        self.cache.get(&index)
    }

    /// Per-frame entry point used by the surface renderer: binds `slot` to
    /// page `index`, counting a hit on a predicted page as navigation.
    pub fn set_texture(&mut self, book: &dyn BookContext, slot: SlotId, index: usize) {
        if self.predicted.contains(&index) && self.cache.contains(&index) {
            self.record_request(index);
        }
        let _ = self.get_or_load(book, index, Some(slot));
    }

    /// What `slot` should display right now, if any page claims it.
    pub fn slot_view(&self, slot: SlotId) -> Option<SlotView<'_>> {
        let (_, entry) = self
            .cache
            .values()
            .find(|(_, entry)| entry.material == Some(slot))?;
        if let Some(bitmap) = entry.texture.as_ref() {
            return Some(SlotView::Texture {
                index: entry.index,
                bitmap,
            });
        }
        if self.loading_animation {
            if let Some(animation) = self.placeholders.get(entry.color) {
                return Some(SlotView::Loading {
                    color: entry.color,
                    frame: animation.frame(),
                });
            }
        }
        Some(SlotView::Flat { color: entry.color })
    }

    pub fn enable_loading_animation(&mut self, enable: bool) {
        self.loading_animation = enable;
    }

    /// Advances loading animations of visible pages that have no raster yet.
    pub fn update(&mut self, book: &dyn BookContext, dt: f32) {
        if !self.loading_animation || self.disposed {
            return;
        }
        let colors: Vec<u32> = self
            .cache
            .values()
            .filter(|(index, entry)| entry.texture.is_none() && book.is_active_page(**index))
            .map(|(_, entry)| entry.color)
            .collect();
        self.placeholders.update(colors, dt);
    }

    /// Applies `text` as the search query of page `index`: right away when the
    /// page is active, otherwise once it becomes active. Pages built later
    /// start with the same query.
    pub fn set_search_query(&mut self, index: usize, text: &str) {
        if self.disposed {
            return;
        }
        let query = text.trim().to_owned();
        self.query = query.clone();
        let Some(entry) = self.cache.get_mut(&index) else {
            return;
        };
        if entry.state != PageState::Active {
            entry.pending.push_back(Pending::Query(query));
            return;
        }
        if apply_query(entry, &query) {
            self.push_in_render_queue(index);
        }
    }

    pub fn set_zoom(&mut self, book: &dyn BookContext, zoom: f32) {
        if (self.config.zoom - zoom).abs() <= f32::EPSILON {
            return;
        }
        self.config.zoom = zoom;
        if self.config.auto_resolution.enabled {
            self.invalidate_for_zoom_change(book);
        }
    }

    pub fn set_viewport(&mut self, book: &dyn BookContext, viewport: Viewport) {
        if self.viewport == viewport {
            return;
        }
        self.viewport = viewport;
        if self.config.auto_resolution.enabled {
            self.invalidate_for_zoom_change(book);
        }
    }

    /// Forces every built page to pick up a new resolution. Unlocked pages are
    /// dropped and, when bound to a slot, requested again; locked pages are
    /// queued for another render instead.
    #[instrument(level = "debug", skip(self, book))]
    pub fn invalidate_for_zoom_change(&mut self, book: &dyn BookContext) {
        if self.disposed {
            return;
        }
        for index in self.cache.keys() {
            let Some(entry) = self.cache.get(&index) else {
                continue;
            };
            // Loading pages pick up the new resolution when they are first rendered.
            if !entry.is_constructed() || entry.state == PageState::Loading {
                continue;
            }
            let slot = entry.material;
            if self.remove_unlocked(book, index) {
                if slot.is_some() {
                    self.load(book, index, slot);
                }
            } else {
                self.push_in_render_queue(index);
            }
        }
    }

    /// Disposes page `index` unless it is locked.
    pub fn release(&mut self, book: &dyn BookContext, index: usize) -> bool {
        !self.disposed && self.remove_unlocked(book, index)
    }

    /// Asks the overlay source for the layers of page `index`. Content is
    /// handed out through [`take_layer_deliveries`](Self::take_layer_deliveries)
    /// once the page is active.
    pub fn request_layers(&mut self, index: usize) {
        let Some(source) = self.overlays.as_ref() else {
            self.layer_deliveries.push((index, Vec::new()));
            return;
        };
        let document_page = self
            .config
            .document_page(index, self.catalog.page_count());
        source.fetch(document_page, LayerSink::new(index, self.events_tx.clone()));
    }

    /// Runs deferred work and applies backend notifications until idle.
    pub fn pump(&mut self, book: &dyn BookContext) {
        if self.disposed {
            return;
        }
        loop {
            if let Some(task) = self.tasks.pop_front() {
                self.run_task(book, task);
                continue;
            }
            match self.events_rx.try_recv() {
                Ok(event) => self.handle_event(book, event),
                Err(_) => break,
            }
        }
    }

    /// One scheduling round: shrink the cache if locks allow it, then start
    /// at most one render.
    pub fn tick(&mut self, book: &dyn BookContext) {
        if self.disposed {
            return;
        }
        self.trim(book);

        let Some(candidate) = self.scheduler.select(book, self.viewport.is_mobile()) else {
            return;
        };
        let item = candidate.item;
        let live = self.cache.get(&item.index).is_some_and(|entry| {
            entry.generation == item.generation && entry.state == PageState::QueuedForRender
        });
        if !live {
            self.scheduler.remove(item.index);
            return;
        }

        let resolution = self.resolution_for_entry(book, item.index);
        let Some(entry) = self.cache.get_mut(&item.index) else {
            return;
        };
        let Some(backend) = entry.backend.as_mut() else {
            self.scheduler.remove(item.index);
            return;
        };

        if !backend.supports_deferred_start() {
            debug!(page = item.index, "eager backend, skipping render slot");
            self.scheduler.remove(item.index);
            if entry.texture.is_some() {
                self.activate(item.index);
            } else {
                entry.state = PageState::Loading;
            }
            return;
        }

        entry.state = PageState::Rendering;
        entry.resolution = resolution;
        backend.raster_mut().set_resolution(resolution);
        backend.start_render();
        self.scheduler.begin(item);
        debug!(
            page = item.index,
            priority = ?candidate.priority,
            width = resolution.width,
            height = resolution.height,
            "render started"
        );
    }

    /// Disposes every page and the placeholder textures. The manager ignores
    /// all calls afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        info!(pages = self.cache.len(), "disposing page manager");
        self.cache.dispose_all();
        self.scheduler.clear();
        self.tasks.clear();
        self.placeholders.dispose();
        self.layer_deliveries.clear();
        self.disposed = true;
    }

    fn next_generation(&mut self) -> Generation {
        self.next_generation += 1;
        Generation(self.next_generation)
    }

    fn locked_in_flight(&self) -> Option<usize> {
        self.scheduler.in_flight().map(|item| item.index)
    }

    fn load(&mut self, book: &dyn BookContext, index: usize, slot: Option<SlotId>) {
        let generation = self.next_generation();
        let sheet = *self.config.sheet_for(index, book.page_count());
        let entry = PageEntry {
            index,
            state: PageState::Loading,
            generation,
            color: sheet.color,
            width_texels: sheet.width_texels,
            height_texels: sheet.height_texels,
            resolution: Resolution::new(sheet.width_texels as f32, sheet.height_texels as f32),
            interactive: false,
            backend: None,
            texture: None,
            material: None,
            pending: VecDeque::new(),
        };
        debug!(page = index, ?generation, "loading page");

        self.tasks.push_back(Task::Construct { index, generation });
        self.notices.push(PageNotice::LoadPage { index });

        let in_flight = self.locked_in_flight();
        let evicted = self.cache.put(index, entry, |key, entry| {
            is_locked(book, in_flight, key, entry)
        });
        self.forget_evicted(evicted);
        if let Some(slot) = slot {
            self.bind_slot(index, slot);
        }
    }

    fn bind_slot(&mut self, index: usize, slot: SlotId) {
        for key in self.cache.keys() {
            if key == index {
                continue;
            }
            if let Some(other) = self.cache.get_mut(&key) {
                if other.material == Some(slot) {
                    other.material = None;
                }
            }
        }
        if let Some(entry) = self.cache.get_mut(&index) {
            entry.material = Some(slot);
        }
    }

    fn record_request(&mut self, index: usize) {
        self.history.push(index);
        if !self
            .tasks
            .iter()
            .any(|task| matches!(task, Task::Prefetch))
        {
            self.tasks.push_back(Task::Prefetch);
        }
    }

    fn remove_unlocked(&mut self, book: &dyn BookContext, index: usize) -> bool {
        let in_flight = self.locked_in_flight();
        let removed = self.cache.remove(&index, |key, entry| {
            is_locked(book, in_flight, key, entry)
        });
        if removed {
            self.scheduler.forget(index);
        }
        removed
    }

    fn trim(&mut self, book: &dyn BookContext) {
        let in_flight = self.locked_in_flight();
        let evicted = self
            .cache
            .trim(|key, entry| is_locked(book, in_flight, key, entry));
        self.forget_evicted(evicted);
    }

    fn forget_evicted(&mut self, evicted: Vec<usize>) {
        for index in evicted {
            debug!(page = index, "evicted page");
            self.scheduler.forget(index);
        }
    }

    fn is_live(&self, index: usize, generation: Generation) -> bool {
        self.cache
            .get(&index)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn run_task(&mut self, book: &dyn BookContext, task: Task) {
        match task {
            Task::Construct { index, generation } => self.construct(book, index, generation),
            Task::Prefetch => self.prefetch(book),
        }
    }

    fn construct(&mut self, book: &dyn BookContext, index: usize, generation: Generation) {
        if !self.is_live(index, generation) {
            return;
        }
        let page_count = book.page_count();
        let document_page = self.config.document_page(index, page_count);
        let descriptor = self.catalog.describe(document_page);
        let sheet = *self.config.sheet_for(index, page_count);
        let width_texels = descriptor.width_texels.unwrap_or(sheet.width_texels);
        let height_texels = descriptor.height_texels.unwrap_or(sheet.height_texels);
        let resolution = self.resolution(book, index, width_texels, height_texels);
        let interactive = descriptor.interactive;

        let request = BuildRequest {
            index,
            document_page,
            descriptor,
            resolution,
            color: sheet.color,
        };
        let sink = RasterSink::new(index, generation, self.events_tx.clone());
        let built = self.factory.build(request, sink);

        let query = self.query.clone();
        let Some(entry) = self.cache.get_mut(&index) else {
            return;
        };
        entry.width_texels = width_texels;
        entry.height_texels = height_texels;
        entry.resolution = resolution;
        entry.interactive = interactive;
        match built {
            Ok(backend) => {
                entry.backend = Some(backend);
                apply_query(entry, &query);
            }
            Err(err) => {
                let error = PageError::construction(index, &err);
                warn!(page = index, %error, "page construction failed, keeping placeholder");
            }
        }
    }

    fn prefetch(&mut self, book: &dyn BookContext) {
        let history = self.history.to_vec();
        self.predicted = self
            .predictor
            .predict(&history, self.config.preload_pages);
        let page_count = book.page_count();
        for index in self.predicted.clone() {
            if index < page_count && !self.cache.contains(&index) {
                debug!(page = index, "prefetching predicted page");
                self.load(book, index, None);
            }
        }
    }

    fn handle_event(&mut self, book: &dyn BookContext, event: PageEvent) {
        match event {
            PageEvent::Ready { index, generation } => {
                if !self.is_live(index, generation) {
                    return;
                }
                self.push_in_render_queue(index);
                self.notices.push(PageNotice::LoadedPage { index });
            }
            PageEvent::RasterComplete {
                index,
                generation,
                bitmap,
            } => {
                let freed = self.scheduler.finish(index, generation);
                if self.is_live(index, generation) {
                    if let Some(entry) = self.cache.get_mut(&index) {
                        entry.texture = Some(bitmap);
                        if entry.state != PageState::QueuedForRender {
                            self.activate(index);
                        }
                    }
                }
                if freed {
                    self.tick(book);
                }
            }
            PageEvent::Failed {
                index,
                generation,
                error,
            } => {
                let freed = self.scheduler.finish(index, generation);
                if self.is_live(index, generation) {
                    let error = PageError::raster(index, &error);
                    warn!(page = index, %error, "page raster failed, keeping placeholder");
                    let status = self
                        .cache
                        .get(&index)
                        .map(|entry| (entry.state, entry.texture.is_some()));
                    match status {
                        // Already asked to render again.
                        Some((PageState::QueuedForRender, _)) | None => {}
                        Some((_, true)) => self.activate(index),
                        Some((_, false)) => {
                            if let Some(entry) = self.cache.get_mut(&index) {
                                entry.state = PageState::Loading;
                            }
                        }
                    }
                }
                if freed {
                    self.tick(book);
                }
            }
            PageEvent::LayersFetched { index, result } => {
                let layers = match result {
                    Ok(layers) => layers,
                    Err(err) => {
                        let error = PageError::overlay_fetch(index, &err);
                        warn!(page = index, %error, "overlay fetch failed");
                        self.layer_deliveries.push((index, Vec::new()));
                        return;
                    }
                };
                match self.cache.get_mut(&index) {
                    Some(entry) if entry.state == PageState::Active => {
                        self.layer_deliveries.push((index, layers));
                    }
                    Some(entry) => entry.pending.push_back(Pending::Layers(layers)),
                    None => debug!(page = index, "overlay content for uncached page dropped"),
                }
            }
        }
    }

    fn push_in_render_queue(&mut self, index: usize) {
        let Some(entry) = self.cache.get_mut(&index) else {
            return;
        };
        if entry.state == PageState::QueuedForRender {
            return;
        }
        entry.state = PageState::QueuedForRender;
        let generation = entry.generation;
        self.scheduler.enqueue(index, generation);
    }

    /// Marks page `index` active and releases its deferred requests in order.
    fn activate(&mut self, index: usize) {
        let pending = match self.cache.get_mut(&index) {
            Some(entry) => {
                entry.state = PageState::Active;
                std::mem::take(&mut entry.pending)
            }
            None => return,
        };
        debug!(page = index, pending = pending.len(), "page active");
        for request in pending {
            match request {
                Pending::Query(query) => {
                    let applied = self
                        .cache
                        .get_mut(&index)
                        .is_some_and(|entry| apply_query(entry, &query));
                    if applied {
                        self.push_in_render_queue(index);
                    }
                }
                Pending::Layers(layers) => self.layer_deliveries.push((index, layers)),
            }
        }
    }

    fn resolution_for_entry(&self, book: &dyn BookContext, index: usize) -> Resolution {
        match self.cache.get(&index) {
            Some(entry) => self.resolution(book, index, entry.width_texels, entry.height_texels),
            None => Resolution::new(1.0, 1.0),
        }
    }

    fn is_single_page(&self, book: &dyn BookContext, index: usize) -> bool {
        self.config.single_page || index == 0 || index + 1 == book.page_count()
    }

    /// Native texel size, or with auto-resolution the size that fits the
    /// viewport at the current zoom.
    fn resolution(
        &self,
        book: &dyn BookContext,
        index: usize,
        width_texels: u32,
        height_texels: u32,
    ) -> Resolution {
        let (wt, ht) = (width_texels.max(1) as f32, height_texels.max(1) as f32);
        let auto = self.config.auto_resolution;
        if !auto.enabled {
            return Resolution::new(wt, ht);
        }
        let layout = if self.is_single_page(book, index) {
            1.0
        } else {
            0.5
        };
        let viewport_width = self.viewport.width * self.viewport.device_pixel_ratio;
        let viewport_height = self.viewport.height * self.viewport.device_pixel_ratio;
        let k = (layout * viewport_width / wt).min(viewport_height / ht);
        let scale = auto.k * self.config.zoom * k;
        Resolution::new(scale * wt, scale * ht)
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        self.dispose();
    }
}
