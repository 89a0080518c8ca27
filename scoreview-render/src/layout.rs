use scoreview_core::EngineOptions;
use serde_json::Value;

use crate::score::{Measure, Score};

/// One staff space in layout units.
pub const UNIT: f64 = 90.0;
pub const STAFF_HEIGHT: f64 = 4.0 * UNIT;
pub const PAGE_MARGIN: f64 = 100.0;
pub const MEASURE_PADDING: f64 = 2.0 * UNIT;
pub const EVENT_SPACING: f64 = 2.5 * UNIT;
pub const MIN_MEASURE_WIDTH: f64 = 600.0;
pub const SYSTEM_GAP: f64 = 6.0 * UNIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakMode {
    /// Greedy line filling.
    Auto,
    /// Only the encoded `sb`/`pb` elements and page overflow break.
    Encoded,
    /// Everything on a single system.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutParams {
    pub page_width: f64,
    pub page_height: f64,
    pub scale: f64,
    pub spacing_staff: f64,
    pub breaks: BreakMode,
}

impl LayoutParams {
    pub fn from_options(options: &EngineOptions) -> Self {
        let number = |key: &str, default: f64| {
            options
                .get(key)
                .and_then(Value::as_f64)
                .filter(|value| *value > 0.0)
                .unwrap_or(default)
        };
        let breaks = match options.get("breaks").and_then(Value::as_str) {
            Some("encoded") | Some("line") => BreakMode::Encoded,
            Some("none") => BreakMode::None,
            _ => BreakMode::Auto,
        };
        Self {
            page_width: number("pageWidth", 4500.0),
            page_height: number("pageHeight", 4500.0),
            scale: number("scale", 20.0),
            spacing_staff: number("spacingStaff", 7.0),
            breaks,
        }
    }

    pub fn staff_gap(&self) -> f64 {
        self.spacing_staff * UNIT / 2.0
    }

    /// Height of the stacked staves of one system, gaps between staves included.
    pub fn staves_height(&self, staves: usize) -> f64 {
        let staves = staves.max(1) as f64;
        staves * STAFF_HEIGHT + (staves - 1.0) * self.staff_gap()
    }

    pub fn staff_top(&self, system_y: f64, staff: usize) -> f64 {
        system_y + staff as f64 * (STAFF_HEIGHT + self.staff_gap())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedMeasure {
    pub index: usize,
    pub x: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemLayout {
    pub y: f64,
    pub measures: Vec<PlacedMeasure>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub systems: Vec<SystemLayout>,
}

impl PageLayout {
    pub fn measure_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.systems
            .iter()
            .flat_map(|system| system.measures.iter().map(|placed| placed.index))
    }
}

pub fn measure_width(measure: &Measure) -> f64 {
    (MEASURE_PADDING + EVENT_SPACING * measure.events as f64).max(MIN_MEASURE_WIDTH)
}

struct PendingSystem {
    measures: Vec<PlacedMeasure>,
    page_break: bool,
}

/// Fills systems left to right, then stacks systems onto pages top to
/// bottom. A measure or system that alone exceeds the page still gets its
/// own line or page.
pub fn paginate(score: &Score, params: &LayoutParams) -> Vec<PageLayout> {
    let usable_width = (params.page_width - 2.0 * PAGE_MARGIN).max(0.0);
    let usable_height = (params.page_height - 2.0 * PAGE_MARGIN).max(0.0);

    let mut systems: Vec<PendingSystem> = Vec::new();
    let mut current = PendingSystem {
        measures: Vec::new(),
        page_break: false,
    };
    let mut x = 0.0;
    let mut movement = None;

    for (index, measure) in score.measures.iter().enumerate() {
        let width = measure_width(measure);
        let new_movement = movement.is_some_and(|previous| previous != measure.movement);
        movement = Some(measure.movement);

        let wrap = !current.measures.is_empty()
            && match params.breaks {
                BreakMode::Auto => new_movement || x + width > usable_width,
                BreakMode::Encoded => new_movement || measure.system_break || measure.page_break,
                BreakMode::None => false,
            };
        if wrap {
            let next = PendingSystem {
                measures: Vec::new(),
                page_break: params.breaks == BreakMode::Encoded && measure.page_break,
            };
            systems.push(std::mem::replace(&mut current, next));
            x = 0.0;
        }

        current.measures.push(PlacedMeasure {
            index,
            x: PAGE_MARGIN + x,
            width,
        });
        x += width;
    }
    if !current.measures.is_empty() {
        systems.push(current);
    }

    let system_height = params.staves_height(score.staves) + SYSTEM_GAP;
    let mut pages = Vec::new();
    let mut page = PageLayout::default();
    let mut y = 0.0;
    for system in systems {
        let overflow = y + system_height > usable_height;
        if !page.systems.is_empty() && (overflow || system.page_break) {
            pages.push(std::mem::take(&mut page));
            y = 0.0;
        }
        page.systems.push(SystemLayout {
            y: PAGE_MARGIN + y,
            measures: system.measures,
        });
        y += system_height;
    }
    if !page.systems.is_empty() {
        pages.push(page);
    }
    pages
}
