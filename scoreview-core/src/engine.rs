use std::collections::{BTreeSet, HashSet};
use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::annotations::Marker;
use crate::config::EngineOptions;
use crate::error::{ViewerError, ViewerResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMeasure {
    pub id: String,
    pub staff_bbox: BoundingBox,
}

/// One page of engine output plus the per-element state the viewer keeps on
/// top of it (highlight flags and annotation markers).
#[derive(Debug, Clone, Serialize)]
pub struct RenderedPage {
    pub number: u32,
    pub markup: String,
    pub measures: Vec<RenderedMeasure>,
    element_ids: HashSet<String>,
    highlighted: BTreeSet<String>,
    markers: Vec<Marker>,
}

impl RenderedPage {
    pub fn new<I>(number: u32, markup: String, measures: Vec<RenderedMeasure>, element_ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut element_ids: HashSet<String> = element_ids.into_iter().collect();
        element_ids.extend(measures.iter().map(|measure| measure.id.clone()));
        Self {
            number,
            markup,
            measures,
            element_ids,
            highlighted: BTreeSet::new(),
            markers: Vec::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.element_ids.contains(id)
    }

    /// Returns false when the element is not part of this page.
    pub fn set_highlight(&mut self, id: &str, on: bool) -> bool {
        if !self.contains(id) {
            return false;
        }
        if on {
            self.highlighted.insert(id.to_string());
        } else {
            self.highlighted.remove(id);
        }
        true
    }

    pub fn is_highlighted(&self, id: &str) -> bool {
        self.highlighted.contains(id)
    }

    pub fn highlighted(&self) -> &BTreeSet<String> {
        &self.highlighted
    }

    pub fn push_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }
}

/// Engine answer for a playback position. Page 0 means nothing is sounding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimedElements {
    pub page: u32,
    pub elements: BTreeSet<String>,
}

/// The notation engine the viewer drives. Implementations lay out the whole
/// document on every `load_data` or option change.
pub trait RenderingEngine: Send {
    fn version(&self) -> String;
    fn load_data(&mut self, data: &str) -> Result<()>;
    fn set_options(&mut self, options: &EngineOptions) -> Result<()>;
    fn options(&self) -> EngineOptions;
    fn render_page(&self, page: u32) -> Result<RenderedPage>;
    fn page_count(&self) -> u32;
    /// Page holding `element_id`, or 0 when no page does.
    fn page_with_element(&self, element_id: &str) -> u32;
    fn elements_at_time(&self, millis: u64) -> TimedElements;
    fn render_to_audio(&self) -> Result<Vec<u8>>;
}

#[async_trait::async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, engine_url: &str) -> Result<Box<dyn RenderingEngine>>;
}

#[derive(Default)]
pub enum EngineHandle {
    #[default]
    Uninitialized,
    Ready(Box<dyn RenderingEngine>),
    Failed(String),
}

impl EngineHandle {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineHandle::Ready(_))
    }

    pub fn get(&self) -> ViewerResult<&dyn RenderingEngine> {
        match self {
            EngineHandle::Ready(engine) => Ok(engine.as_ref()),
            EngineHandle::Failed(reason) => Err(ViewerError::EngineInit(reason.clone())),
            EngineHandle::Uninitialized => Err(ViewerError::EngineNotReady),
        }
    }

    pub fn get_mut(&mut self) -> ViewerResult<&mut dyn RenderingEngine> {
        match self {
            EngineHandle::Ready(engine) => Ok(engine.as_mut()),
            EngineHandle::Failed(reason) => Err(ViewerError::EngineInit(reason.clone())),
            EngineHandle::Uninitialized => Err(ViewerError::EngineNotReady),
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineHandle::Uninitialized => f.write_str("Uninitialized"),
            EngineHandle::Ready(engine) => write!(f, "Ready({})", engine.version()),
            EngineHandle::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}
