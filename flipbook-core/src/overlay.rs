//! Interactive overlay layers that follow the visible pages.
//!
//! Overlay content is fetched lazily the first time a page becomes active and
//! kept for the rest of the session. Layers fade in and out; each transition
//! only completes if no newer transition was issued on the same layer before
//! its delay elapsed.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::PageEvent;
use crate::book::{facing_pages, BookContext};
use crate::config::OverlayConfig;
use crate::manager::PageManager;

/// Script-side hooks of an overlay layer.
pub trait LayerBehavior: Send {
    fn on_show(&mut self) {}
    fn on_shown(&mut self) {}
    fn on_hide(&mut self) {}
    fn on_hidden(&mut self) {}
    fn dispose(&mut self) {}
}

/// One overlay layer as produced by an [`OverlaySource`].
pub struct LayerContent {
    pub markup: String,
    pub style: String,
    pub behavior: Option<Box<dyn LayerBehavior>>,
}

impl LayerContent {
    pub fn new(markup: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            style: style.into(),
            behavior: None,
        }
    }

    pub fn with_behavior(mut self, behavior: Box<dyn LayerBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }
}

impl fmt::Debug for LayerContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerContent")
            .field("markup", &self.markup)
            .field("style", &self.style)
            .field("behavior", &self.behavior.is_some())
            .finish()
    }
}

/// Handle an overlay source uses to hand back the content for one page.
#[derive(Debug, Clone)]
pub struct LayerSink {
    index: usize,
    events: UnboundedSender<PageEvent>,
}

impl LayerSink {
    pub fn new(index: usize, events: UnboundedSender<PageEvent>) -> Self {
        Self { index, events }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn deliver(&self, result: Result<Vec<LayerContent>>) {
        let _ = self.events.send(PageEvent::LayersFetched {
            index: self.index,
            result,
        });
    }
}

/// Asynchronously produces the overlay layers of a page. Pages without an
/// overlay deliver an empty list.
pub trait OverlaySource {
    /// `document_page` names the content to load; `sink` is already bound to
    /// the displayed page it belongs to.
    fn fetch(&self, document_page: usize, sink: LayerSink);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Show,
    Hide,
}

struct PendingTransition {
    kind: TransitionKind,
    due: Instant,
    done: oneshot::Sender<()>,
}

/// A single show/hide-animatable overlay layer.
pub struct OverlayLayer {
    content: LayerContent,
    width: u32,
    height: u32,
    hidden: bool,
    pending: Option<PendingTransition>,
}

fn resolved() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(());
    rx
}

impl OverlayLayer {
    pub fn new(content: LayerContent, width: u32, height: u32) -> Self {
        Self {
            content,
            width,
            height,
            hidden: true,
            pending: None,
        }
    }

    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_transitioning(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts fading in. Resolves at once when already visible.
    pub fn show(&mut self, now: Instant, delay: Duration) -> oneshot::Receiver<()> {
        if !self.hidden {
            return resolved();
        }
        self.hidden = false;
        if let Some(behavior) = self.content.behavior.as_mut() {
            behavior.on_show();
        }
        self.schedule(TransitionKind::Show, now + delay)
    }

    /// Starts fading out. Resolves at once when already hidden.
    pub fn hide(&mut self, now: Instant, delay: Duration) -> oneshot::Receiver<()> {
        if self.hidden {
            return resolved();
        }
        self.hidden = true;
        if let Some(behavior) = self.content.behavior.as_mut() {
            behavior.on_hide();
        }
        self.schedule(TransitionKind::Hide, now + delay)
    }

    fn schedule(&mut self, kind: TransitionKind, due: Instant) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        // Replacing the pending transition drops its sender, so a superseded
        // completion never fires.
        self.pending = Some(PendingTransition { kind, due, done });
        rx
    }

    /// Completes the pending transition once its delay has elapsed.
    pub fn poll(&mut self, now: Instant) {
        let due = matches!(&self.pending, Some(pending) if pending.due <= now);
        if !due {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(behavior) = self.content.behavior.as_mut() {
            match pending.kind {
                TransitionKind::Show => behavior.on_shown(),
                TransitionKind::Hide => behavior.on_hidden(),
            }
        }
        let _ = pending.done.send(());
    }

    pub fn dispose(&mut self) {
        self.pending = None;
        if let Some(behavior) = self.content.behavior.as_mut() {
            behavior.dispose();
        }
    }
}

/// Completion of a batch of layer transitions.
#[derive(Debug, Default)]
pub struct TransitionHandle {
    pending: Vec<oneshot::Receiver<()>>,
    superseded: bool,
}

impl TransitionHandle {
    fn push(&mut self, rx: oneshot::Receiver<()>) {
        self.pending.push(rx);
    }

    /// Number of transitions still outstanding.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Waits for every transition. Returns false if any was superseded.
    pub async fn finished(self) -> bool {
        let mut all = !self.superseded;
        for rx in self.pending {
            all &= rx.await.is_ok();
        }
        all
    }

    /// Non-blocking check: `Some(true)` when every transition completed,
    /// `Some(false)` when one was superseded, `None` while still running.
    pub fn try_finished(&mut self) -> Option<bool> {
        let mut waiting = Vec::new();
        for mut rx in self.pending.drain(..) {
            match rx.try_recv() {
                Ok(()) => {}
                Err(oneshot::error::TryRecvError::Empty) => waiting.push(rx),
                Err(oneshot::error::TryRecvError::Closed) => self.superseded = true,
            }
        }
        self.pending = waiting;
        if self.pending.is_empty() {
            Some(!self.superseded)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Loading,
    Ready,
}

pub struct OverlayEntry {
    state: OverlayState,
    layers: Vec<OverlayLayer>,
}

impl OverlayEntry {
    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn layers(&self) -> &[OverlayLayer] {
        &self.layers
    }
}

#[derive(Debug, Clone, Copy)]
struct SettleTimer {
    index: usize,
    due: Instant,
}

/// Keeps overlay layers in step with the pages facing the viewer.
pub struct OverlaySynchronizer {
    config: OverlayConfig,
    layer_height: u32,
    entries: HashMap<usize, OverlayEntry>,
    settling: Vec<SettleTimer>,
    hidden: bool,
}

impl OverlaySynchronizer {
    /// `aspect` is the page height divided by its width.
    pub fn new(config: OverlayConfig, aspect: f32) -> Self {
        let layer_height = (config.layer_width as f32 * aspect).round().max(1.0) as u32;
        Self {
            config,
            layer_height,
            entries: HashMap::new(),
            settling: Vec::new(),
            hidden: false,
        }
    }

    pub fn active_indices(book: &dyn BookContext) -> Vec<usize> {
        facing_pages(book.current_page(), book.page_count())
    }

    pub fn entry(&self, index: usize) -> Option<&OverlayEntry> {
        self.entries.get(&index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Applies content the manager has released, then reconciles layers with
    /// the active pages: new pages start loading, pages that left are hidden.
    pub fn sync_visibility(
        &mut self,
        book: &dyn BookContext,
        manager: &mut PageManager,
        now: Instant,
    ) -> TransitionHandle {
        self.absorb(book, manager, now);
        let actives = Self::active_indices(book);
        self.reveal(&actives, manager, now);

        let mut handle = TransitionHandle::default();
        let delay = self.config.transition_delay;
        for (index, entry) in self.entries.iter_mut() {
            if actives.contains(index) {
                continue;
            }
            for layer in entry.layers.iter_mut() {
                handle.push(layer.hide(now, delay));
            }
        }
        handle
    }

    /// Clears the global hide and shows the active pages' layers.
    pub fn show(&mut self, book: &dyn BookContext, manager: &mut PageManager, now: Instant) {
        self.hidden = false;
        self.absorb(book, manager, now);
        let actives = Self::active_indices(book);
        self.reveal(&actives, manager, now);
    }

    /// Hides every layer, typically while a page turn is in progress.
    pub fn hide(&mut self, now: Instant) -> TransitionHandle {
        self.hidden = true;
        let delay = self.config.transition_delay;
        let mut handle = TransitionHandle::default();
        for entry in self.entries.values_mut() {
            for layer in entry.layers.iter_mut() {
                handle.push(layer.hide(now, delay));
            }
        }
        handle
    }

    /// Fires due settle timers and completes due transitions.
    pub fn advance(&mut self, book: &dyn BookContext, now: Instant) {
        let actives = Self::active_indices(book);
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.settling.drain(..).partition(|timer| timer.due <= now);
        self.settling = waiting;

        for timer in due {
            if self.hidden || !actives.contains(&timer.index) {
                continue;
            }
            if let Some(entry) = self.entries.get_mut(&timer.index) {
                for layer in entry.layers.iter_mut() {
                    let _ = layer.show(timer.due, self.config.transition_delay);
                }
            }
        }

        for entry in self.entries.values_mut() {
            for layer in entry.layers.iter_mut() {
                layer.poll(now);
            }
        }
    }

    pub fn dispose(&mut self) {
        for entry in self.entries.values_mut() {
            for layer in entry.layers.iter_mut() {
                layer.dispose();
            }
        }
        self.entries.clear();
        self.settling.clear();
    }

    fn absorb(&mut self, book: &dyn BookContext, manager: &mut PageManager, now: Instant) {
        manager.pump(book);
        for (index, contents) in manager.take_layer_deliveries() {
            self.deliver(index, contents, now);
        }
    }

    fn reveal(&mut self, actives: &[usize], manager: &mut PageManager, now: Instant) {
        let delay = self.config.transition_delay;
        for &index in actives {
            match self.entries.get_mut(&index) {
                Some(entry) => {
                    // Freshly delivered layers wait for their settle timer.
                    let settling = self.settling.iter().any(|timer| timer.index == index);
                    if self.hidden || settling || entry.state != OverlayState::Ready {
                        continue;
                    }
                    for layer in entry.layers.iter_mut() {
                        if layer.is_hidden() {
                            let _ = layer.show(now, delay);
                        }
                    }
                }
                None => {
                    debug!(page = index, "requesting overlay content");
                    self.entries.insert(
                        index,
                        OverlayEntry {
                            state: OverlayState::Loading,
                            layers: Vec::new(),
                        },
                    );
                    manager.request_layers(index);
                }
            }
        }
    }

    fn deliver(&mut self, index: usize, contents: Vec<LayerContent>, now: Instant) {
        let Some(entry) = self.entries.get_mut(&index) else {
            warn!(page = index, "overlay content arrived for an untracked page");
            return;
        };
        if entry.state == OverlayState::Ready {
            return;
        }
        for content in contents {
            entry.layers.push(OverlayLayer::new(
                content,
                self.config.layer_width,
                self.layer_height,
            ));
        }
        entry.state = OverlayState::Ready;
        if !entry.layers.is_empty() {
            self.settling.push(SettleTimer {
                index,
                due: now + self.config.settle_delay,
            });
        }
    }
}

impl Drop for OverlaySynchronizer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct HookLog(Arc<Mutex<Vec<&'static str>>>);

    impl HookLog {
        fn entries(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LayerBehavior for HookLog {
        fn on_show(&mut self) {
            self.0.lock().unwrap().push("show");
        }
        fn on_shown(&mut self) {
            self.0.lock().unwrap().push("shown");
        }
        fn on_hide(&mut self) {
            self.0.lock().unwrap().push("hide");
        }
        fn on_hidden(&mut self) {
            self.0.lock().unwrap().push("hidden");
        }
        fn dispose(&mut self) {
            self.0.lock().unwrap().push("dispose");
        }
    }

    fn layer_with(log: &HookLog) -> OverlayLayer {
        let content = LayerContent::new("<p>hi</p>", "p {}").with_behavior(Box::new(log.clone()));
        OverlayLayer::new(content, 1024, 1448)
    }

    #[test]
    fn show_then_hide_before_delay_only_completes_hide() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        let start = Instant::now();
        let delay = Duration::from_millis(150);

        let mut shown = layer.show(start, delay);
        let mut hidden = layer.hide(start + Duration::from_millis(20), delay);
        layer.poll(start + Duration::from_millis(200));

        assert!(layer.is_hidden());
        assert!(matches!(
            shown.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(hidden.try_recv().is_ok());
        assert_eq!(log.entries(), vec!["show", "hide", "hidden"]);
    }

    #[test]
    fn hide_then_show_before_delay_ends_shown() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        let start = Instant::now();
        let delay = Duration::from_millis(150);
        let _ = layer.show(start, delay);
        layer.poll(start + delay);

        let mut hidden = layer.hide(start + Duration::from_millis(300), delay);
        let mut shown = layer.show(start + Duration::from_millis(310), delay);
        layer.poll(start + Duration::from_millis(400));
        assert!(shown.try_recv().is_err());
        layer.poll(start + Duration::from_millis(460));

        assert!(!layer.is_hidden());
        assert!(!layer.is_transitioning());
        assert!(matches!(
            hidden.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(shown.try_recv().is_ok());
        assert_eq!(
            log.entries(),
            vec!["show", "shown", "hide", "show", "shown"]
        );
    }

    #[test]
    fn repeated_hide_is_a_resolved_no_op() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        let mut first = layer.hide(Instant::now(), Duration::from_millis(150));
        assert!(first.try_recv().is_ok());
        assert!(log.entries().is_empty());
    }

    #[test]
    fn transition_handle_reports_superseded_batches() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        let start = Instant::now();
        let delay = Duration::from_millis(50);

        let mut handle = TransitionHandle::default();
        handle.push(layer.show(start, delay));
        assert_eq!(handle.try_finished(), None);
        let _ = layer.hide(start, delay);
        assert_eq!(handle.try_finished(), Some(false));

        let mut handle = TransitionHandle::default();
        handle.push(layer.show(start, delay));
        layer.poll(start + delay);
        assert_eq!(handle.try_finished(), Some(true));
    }

    #[tokio::test]
    async fn finished_waits_for_completion() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        let start = Instant::now();
        let mut handle = TransitionHandle::default();
        handle.push(layer.show(start, Duration::from_millis(5)));
        layer.poll(start + Duration::from_millis(5));
        assert!(handle.finished().await);
    }

    #[test]
    fn dispose_runs_behavior_teardown() {
        let log = HookLog::default();
        let mut layer = layer_with(&log);
        layer.dispose();
        assert_eq!(log.entries(), vec!["dispose"]);
    }
}
