use serde::Serialize;
use serde_json::Value;

use crate::config::{EngineOptions, ViewerConfig};

pub const MIN_ZOOM: u32 = 10;
pub const MAX_ZOOM: u32 = 100;
pub const ZOOM_STEP: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomStep {
    In,
    Out,
}

/// The single mutable record every component reads and writes.
///
/// `current_page` is the only notion of "the page being shown"; requested
/// pages are clamped into it immediately instead of being kept aside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    current_page: u32,
    total_pages: u32,
    zoom: u32,
    page_width: u32,
    page_height: u32,
    options: EngineOptions,
}

impl ViewState {
    pub fn new(config: &ViewerConfig) -> Self {
        let mut state = Self {
            current_page: 1,
            total_pages: 0,
            zoom: clamp_zoom(i64::from(config.zoom)),
            page_width: option_u32(&config.options, "pageWidth").unwrap_or(0),
            page_height: option_u32(&config.options, "pageHeight").unwrap_or(0),
            options: config.options.clone(),
        };
        state.options.insert("scale".into(), Value::from(state.zoom));
        state
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn page_width(&self) -> u32 {
        self.page_width
    }

    pub fn page_height(&self) -> u32 {
        self.page_height
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn max_page(&self) -> u32 {
        self.total_pages.max(1)
    }

    /// Clamps `page` into `[1, max(total_pages, 1)]` and makes it current.
    pub fn goto(&mut self, page: i64) -> u32 {
        self.current_page = page.clamp(1, i64::from(self.max_page())) as u32;
        self.current_page
    }

    /// Moves one page in `direction`; stops at either end instead of wrapping.
    pub fn step(&mut self, direction: PageStep) -> u32 {
        let delta = match direction {
            PageStep::Next => 1,
            PageStep::Previous => -1,
        };
        self.goto(i64::from(self.current_page) + delta)
    }

    /// Records the page count reported by the engine after a render and
    /// re-clamps the current page against it.
    pub fn set_total_pages(&mut self, total: u32) {
        self.total_pages = total;
        self.goto(i64::from(self.current_page));
    }

    pub fn set_zoom(&mut self, zoom: i64) -> u32 {
        self.zoom = clamp_zoom(zoom);
        self.options.insert("scale".into(), Value::from(self.zoom));
        self.zoom
    }

    pub fn adjust_zoom(&mut self, step: ZoomStep) -> u32 {
        let delta = i64::from(ZOOM_STEP);
        let next = match step {
            ZoomStep::In => i64::from(self.zoom) + delta,
            ZoomStep::Out => i64::from(self.zoom) - delta,
        };
        self.set_zoom(next)
    }

    pub fn set_page_width(&mut self, width: u32) {
        self.page_width = width;
        self.options.insert("pageWidth".into(), Value::from(width));
    }

    pub fn set_page_height(&mut self, height: u32) {
        self.page_height = height;
        self.options.insert("pageHeight".into(), Value::from(height));
    }

    /// Merges caller supplied engine options; dimension and scale keys are
    /// mirrored back into the typed fields.
    pub fn merge_options(&mut self, extra: EngineOptions) {
        for (key, value) in extra {
            match key.as_str() {
                "scale" => {
                    if let Some(zoom) = value.as_i64() {
                        self.set_zoom(zoom);
                    }
                }
                "pageWidth" => {
                    if let Some(width) = value.as_u64().and_then(|w| u32::try_from(w).ok()) {
                        self.set_page_width(width);
                    }
                }
                "pageHeight" => {
                    if let Some(height) = value.as_u64().and_then(|h| u32::try_from(h).ok()) {
                        self.set_page_height(height);
                    }
                }
                _ => {
                    self.options.insert(key, value);
                }
            }
        }
    }
}

pub fn clamp_zoom(zoom: i64) -> u32 {
    zoom.clamp(i64::from(MIN_ZOOM), i64::from(MAX_ZOOM)) as u32
}

fn option_u32(options: &EngineOptions, key: &str) -> Option<u32> {
    options
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}
