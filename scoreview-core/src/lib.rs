pub mod address;
pub mod annotations;
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod playback;
pub mod property;
pub mod state;
pub mod viewer;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

pub use address::AddressIndex;
pub use annotations::{AnnotationCatalog, CategoryColorMap, Color, Marker};
pub use config::{EngineOptions, ViewerConfig};
pub use engine::{
    BoundingBox, EngineHandle, EngineLoader, RenderedMeasure, RenderedPage, RenderingEngine,
    TimedElements,
};
pub use error::{ResolveError, ViewerError, ViewerResult};
pub use layout::{plan_dimensions, Debouncer, LayoutPlanner};
pub use playback::{HighlightDelta, PlaybackHighlighter};
pub use property::{Property, PropertyEffect};
pub use state::{PageStep, ViewState, ZoomStep};
pub use viewer::{Viewer, ViewerInput};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c2b9e-6d51-5a8e-9c0b-7e1d4a6f2c33").expect("valid namespace UUID")
});

pub fn document_id_for_url(url: &str) -> DocumentId {
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, url.trim().as_bytes())
}

/// A loaded score: its raw text plus the lookup structures derived from the
/// parsed tree. Replaced wholesale on every load.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub url: String,
    pub text: String,
    pub index: AddressIndex,
    pub annotations: AnnotationCatalog,
}

impl Document {
    pub fn parse(url: &str, text: String) -> ViewerResult<Self> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let (index, annotations) = {
            let tree = roxmltree::Document::parse_with_options(&text, options)
                .map_err(|err| ViewerError::Parse(err.to_string()))?;
            (AddressIndex::build(&tree), AnnotationCatalog::build(&tree))
        };
        Ok(Self {
            id: document_id_for_url(url),
            url: url.to_string(),
            text,
            index,
            annotations,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    PropertyUpdate {
        name: String,
        value: String,
    },
    PageInfoUpdate {
        #[serde(rename = "currentPage")]
        current_page: u32,
        #[serde(rename = "totalPages")]
        total_pages: u32,
    },
}

#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}
