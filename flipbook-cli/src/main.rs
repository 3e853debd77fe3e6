use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use flipbook_core::{
    BookConfig, BookContext, BookState, CatalogProvider, OverlaySynchronizer, PageManager,
    PageNotice, SlotId, Viewport,
};
use flipbook_render::{FileOverlaySource, ImageRasterFactory, ImageSetProvider};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const FRAME: Duration = Duration::from_millis(16);
const FLIP_DURATION: Duration = Duration::from_millis(300);

#[derive(Debug, Parser)]
#[command(
    name = "flipbook",
    version,
    about = "Headless page lifecycle driver for image-set flip books"
)]
struct Args {
    /// Directory holding the page images
    dir: PathBuf,

    /// Book configuration (TOML); defaults to the platform config dir
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Page to open the book on (0-based)
    #[arg(short = 'p', long = "page", default_value_t = 0)]
    page: usize,

    /// Number of page turns to simulate
    #[arg(short = 't', long = "turns", default_value_t = 10)]
    turns: usize,

    /// Delay between simulated page turns in milliseconds
    #[arg(long = "turn-interval-ms", default_value_t = 600)]
    turn_interval_ms: u64,

    /// Search query applied to every page as it becomes visible
    #[arg(short = 'q', long = "query")]
    query: Option<String>,

    #[arg(long = "width", default_value_t = 1280.0)]
    width: f32,

    #[arg(long = "height", default_value_t = 800.0)]
    height: f32,

    /// Values above 1 are treated as a mobile device
    #[arg(long = "device-pixel-ratio", default_value_t = 1.0)]
    device_pixel_ratio: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "flipbook", "flipbook")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("flipbook.toml"));
    let config = BookConfig::load_or_default(&config_path)?;

    let (info, catalog) = ImageSetProvider
        .open(&args.dir)
        .await
        .with_context(|| format!("failed to open {:?}", args.dir))?;
    info!(book = %info.id, pages = info.page_count, path = %info.path.display(), "book opened");

    let aspect = config.page.height_texels as f32 / config.page.width_texels.max(1) as f32;
    let viewport = Viewport {
        width: args.width,
        height: args.height,
        device_pixel_ratio: args.device_pixel_ratio,
    };
    let mut manager = PageManager::new(config.clone(), catalog, Box::new(ImageRasterFactory))
        .with_overlay_source(Box::new(FileOverlaySource::new(&info.path)))
        .with_viewport(viewport);
    let mut overlay = OverlaySynchronizer::new(config.overlay.clone(), aspect);
    let mut book = BookState::new(info.page_count);
    book.turn_to(args.page);

    let mut session = Session {
        turns_left: args.turns,
        flip_until: None,
        last_frame: Instant::now(),
        query: args.query.clone(),
    };
    session.request_visible(&book, &mut manager);
    let _ = overlay.sync_visibility(&book, &mut manager, Instant::now());

    let mut frames = interval(FRAME);
    let mut renders = interval(config.render_interval);
    let mut turns = interval(Duration::from_millis(args.turn_interval_ms));
    for timer in [&mut frames, &mut renders, &mut turns] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }
    turns.tick().await;

    loop {
        tokio::select! {
            _ = frames.tick() => {
                session.frame(&mut book, &mut manager, &mut overlay);
            }
            _ = renders.tick() => manager.tick(&book),
            _ = turns.tick() => {
                if session.turns_left == 0 {
                    if manager.rendering().is_none() && manager.render_queue().is_empty() {
                        break;
                    }
                    continue;
                }
                session.turn(&mut book, &mut overlay);
            }
        }
    }

    info!(
        cached = manager.cached_len(),
        history = ?manager.history(),
        predicted = ?manager.predicted(),
        overlays = overlay.len(),
        "reading session finished"
    );
    overlay.dispose();
    manager.dispose();
    Ok(())
}

/// Simulated reader flipping forward through the book.
struct Session {
    turns_left: usize,
    flip_until: Option<Instant>,
    last_frame: Instant,
    query: Option<String>,
}

impl Session {
    fn request_visible(&self, book: &BookState, manager: &mut PageManager) {
        for (slot, page) in book.active_pages().into_iter().enumerate() {
            manager.set_texture(book, SlotId(slot as u32), page);
            if let Some(query) = self.query.as_deref() {
                manager.set_search_query(page, query);
            }
        }
    }

    fn frame(
        &mut self,
        book: &mut BookState,
        manager: &mut PageManager,
        overlay: &mut OverlaySynchronizer,
    ) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        if self.flip_until.is_some_and(|until| until <= now) {
            self.flip_until = None;
            book.set_processing(false);
            book.set_top_pages(Vec::new());
            overlay.show(book, manager, now);
        }

        self.request_visible(book, manager);
        manager.pump(book);
        manager.update(book, dt);
        if !book.is_processing() {
            let _ = overlay.sync_visibility(book, manager, now);
        }
        overlay.advance(book, now);

        for notice in manager.take_notices() {
            match notice {
                PageNotice::LoadPage { index } => debug!(page = index, "load page"),
                PageNotice::LoadedPage { index } => info!(page = index, "page loaded"),
            }
        }
    }

    fn turn(&mut self, book: &mut BookState, overlay: &mut OverlaySynchronizer) {
        let step = if book.current_page() == 0 { 1 } else { 2 };
        let next = book.current_page() + step;
        if next >= book.page_count() {
            self.turns_left = 0;
            return;
        }
        self.turns_left -= 1;

        let now = Instant::now();
        let _ = overlay.hide(now);
        book.set_processing(true);
        book.turn_to(next);
        book.set_top_pages(book.active_pages());
        self.flip_until = Some(now + FLIP_DURATION);
        info!(page = next, remaining = self.turns_left, "turning page");
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "flipbook.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["flipbook", "pages"]).unwrap();
        assert_eq!(args.dir, PathBuf::from("pages"));
        assert_eq!(args.turns, 10);
        assert_eq!(args.page, 0);
        assert!(args.query.is_none());
    }

    #[test]
    fn turning_past_the_back_cover_ends_the_session() {
        let mut book = BookState::new(4);
        book.turn_to(3);
        let mut overlay = OverlaySynchronizer::new(Default::default(), 1.4);
        let mut session = Session {
            turns_left: 5,
            flip_until: None,
            last_frame: Instant::now(),
            query: None,
        };
        session.turn(&mut book, &mut overlay);
        assert_eq!(session.turns_left, 0);
        assert!(!book.is_processing());

        book.turn_to(0);
        session.turns_left = 2;
        session.turn(&mut book, &mut overlay);
        assert_eq!(book.current_page(), 1);
        assert!(book.is_processing());
        assert_eq!(book.top_pages(), vec![1, 2]);
        assert_eq!(session.turns_left, 1);
    }
}
