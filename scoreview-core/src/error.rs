use thiserror::Error;

/// Why a logical address could not be turned into an element id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no movement labelled or identified as {scope:?}")]
    ScopeNotFound { scope: String },
    #[error("no measure numbered {number:?} in {}", scope_label(.scope))]
    MeasureNotFound {
        scope: Option<String>,
        number: String,
    },
    #[error("no movement labelled or identified as {label:?}")]
    MovementNotFound { label: String },
}

fn scope_label(scope: &Option<String>) -> String {
    match scope {
        Some(scope) => format!("movement {scope:?}"),
        None => "the document".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("rendering engine is not ready")]
    EngineNotReady,
    #[error("rendering engine failed to initialize: {0}")]
    EngineInit(String),
    #[error("no document loaded")]
    NoDocument,
    #[error("failed to fetch {url}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to parse document: {0}")]
    Parse(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("no page contains element {0:?}")]
    ElementNotFound(String),
    #[error("rendering engine error")]
    Engine(#[source] anyhow::Error),
}

impl ViewerError {
    /// Lookup misses are dropped navigation requests; everything else leaves
    /// the view frozen at its previous state.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, ViewerError::Resolve(_) | ViewerError::ElementNotFound(_))
    }

    /// Engine errors can leave options or data half-applied inside the
    /// engine.
    pub fn touched_engine(&self) -> bool {
        matches!(self, ViewerError::Engine(_))
    }
}

pub type ViewerResult<T> = std::result::Result<T, ViewerError>;
