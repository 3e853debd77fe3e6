//! Loading placeholders shown while a page has no raster yet.
//!
//! One animation exists per sheet color. They are created with the manager and
//! released when it is disposed.

use std::collections::HashMap;

use crate::config::SheetConfig;

const SPRITE_TILES: usize = 6;
const FRAME_SECONDS: f32 = 0.2;
/// Texel area the sprite is normalised to (an A4 sheet at 4.5 texels/mm).
const SPRITE_AREA: f32 = 4.5 * 210.0 * 4.5 * 297.0;

#[derive(Debug, Clone)]
pub struct LoadingAnimation {
    color: u32,
    width: u32,
    height: u32,
    elapsed: f32,
}

impl LoadingAnimation {
    pub fn new(sheet: &SheetConfig) -> Self {
        let texels = (sheet.width_texels.max(1) as f32) * (sheet.height_texels.max(1) as f32);
        let scale = (SPRITE_AREA / texels).sqrt();
        Self {
            color: sheet.color,
            width: (scale * sheet.width_texels as f32).round() as u32,
            height: (scale * sheet.height_texels as f32).round() as u32,
            elapsed: 0.0,
        }
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn update(&mut self, dt: f32) {
        let cycle = FRAME_SECONDS * SPRITE_TILES as f32;
        self.elapsed = (self.elapsed + dt.max(0.0)) % cycle;
    }

    pub fn frame(&self) -> usize {
        ((self.elapsed / FRAME_SECONDS) as usize).min(SPRITE_TILES - 1)
    }
}

#[derive(Debug, Default)]
pub struct PlaceholderSet {
    animations: HashMap<u32, LoadingAnimation>,
}

impl PlaceholderSet {
    pub fn new(cover: &SheetConfig, page: &SheetConfig) -> Self {
        let mut animations = HashMap::new();
        animations.insert(cover.color, LoadingAnimation::new(cover));
        animations
            .entry(page.color)
            .or_insert_with(|| LoadingAnimation::new(page));
        Self { animations }
    }

    pub fn get(&self, color: u32) -> Option<&LoadingAnimation> {
        self.animations.get(&color)
    }

    pub fn len(&self) -> usize {
        self.animations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.animations.is_empty()
    }

    /// Advances the animations for `colors` only.
    pub fn update<I>(&mut self, colors: I, dt: f32)
    where
        I: IntoIterator<Item = u32>,
    {
        let mut seen = Vec::new();
        for color in colors {
            if seen.contains(&color) {
                continue;
            }
            seen.push(color);
            if let Some(animation) = self.animations.get_mut(&color) {
                animation.update(dt);
            }
        }
    }

    pub fn dispose(&mut self) {
        self.animations.clear();
    }
}
