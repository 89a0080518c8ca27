use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::ViewerConfig;
use crate::engine::{EngineHandle, EngineLoader, RenderedPage};
use crate::error::{ViewerError, ViewerResult};
use crate::layout::{sleep_until_deadline, LayoutPlanner};
use crate::playback::{HighlightDelta, PlaybackHighlighter, TickPlan};
use crate::property::{Property, PropertyEffect};
use crate::state::{PageStep, ViewState, ZoomStep};
use crate::{Document, DocumentFetcher, Notification};

/// External events, processed strictly in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerInput {
    Property { name: String, value: String },
    Resize { width: u32, height: u32 },
    PlaybackTick { millis: u64 },
    Step(PageStep),
    Goto(i64),
    Zoom(ZoomStep),
}

pub struct Viewer {
    engine_url: String,
    engine: EngineHandle,
    fetcher: Arc<dyn DocumentFetcher>,
    state: ViewState,
    layout: LayoutPlanner,
    scope: Option<String>,
    source_url: Option<String>,
    movement_id: Option<String>,
    document: Option<Document>,
    page: Option<RenderedPage>,
    highlighter: PlaybackHighlighter,
    events: Arc<Mutex<Vec<Notification>>>,
}

impl Viewer {
    pub fn new(config: &ViewerConfig, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            engine_url: config.engine_url.clone(),
            engine: EngineHandle::Uninitialized,
            fetcher,
            state: ViewState::new(config),
            layout: LayoutPlanner::new(config.relayout_delay),
            scope: None,
            source_url: config
                .source_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            movement_id: None,
            document: None,
            page: None,
            highlighter: PlaybackHighlighter::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<Notification>>> {
        Arc::clone(&self.events)
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn page(&self) -> Option<&RenderedPage> {
        self.page.as_ref()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn engine_url(&self) -> &str {
        &self.engine_url
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn layout(&self) -> &LayoutPlanner {
        &self.layout
    }

    pub fn highlighter(&self) -> &PlaybackHighlighter {
        &self.highlighter
    }

    /// One-time engine startup. Pushes the current options and loads a
    /// source staged before the engine was ready.
    #[instrument(skip(self, loader), fields(engine_url = %self.engine_url))]
    pub async fn initialize_engine<L>(&mut self, loader: &L) -> ViewerResult<()>
    where
        L: EngineLoader + ?Sized,
    {
        match loader.load(&self.engine_url).await {
            Ok(mut engine) => {
                info!(version = %engine.version(), "rendering engine ready");
                if let Err(err) = engine.set_options(self.state.options()) {
                    warn!(?err, "engine rejected initial options");
                }
                self.engine = EngineHandle::Ready(engine);
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "rendering engine failed to initialize");
                self.engine = EngineHandle::Failed(reason.clone());
                return Err(ViewerError::EngineInit(reason));
            }
        }

        if self.source_url.is_some() {
            let before = self.state.clone();
            let result = self.load_source().await;
            self.settle(before, result, "load");
        }
        Ok(())
    }

    /// Applies an external property write. Returns false for names the
    /// viewer does not know; those are ignored entirely.
    pub async fn apply_property(&mut self, name: &str, value: &str) -> bool {
        let Some(property) = Property::parse(name, value) else {
            debug!(property = name, "ignoring unrecognized property");
            return false;
        };
        if property.targets_page() {
            self.flush_relayout();
        }
        self.emit(Notification::PropertyUpdate {
            name: name.to_string(),
            value: value.to_string(),
        });

        if property.effect() == PropertyEffect::Ignore {
            debug!(property = name, value, "ignoring unusable property value");
            return true;
        }
        let action = property.name();
        let before = self.state.clone();
        let result = self.apply_effect(property).await;
        self.settle(before, result, action);
        true
    }

    async fn apply_effect(&mut self, property: Property) -> ViewerResult<()> {
        match property {
            Property::Zoom(Some(zoom)) => {
                self.state.set_zoom(zoom);
                self.push_options()?;
                self.render()
            }
            Property::PageNumber(Some(page)) => {
                self.state.goto(page);
                self.render()
            }
            Property::Width(input) => {
                self.layout.set_explicit_width(input.length());
                self.layout.request_relayout();
                Ok(())
            }
            Property::Height(input) => {
                self.layout.set_explicit_height(input.length());
                self.layout.request_relayout();
                Ok(())
            }
            Property::PageWidth(Some(width)) => {
                self.state.set_page_width(width);
                self.reload()
            }
            Property::PageHeight(Some(height)) => {
                self.state.set_page_height(height);
                self.reload()
            }
            Property::SourceUrl(url) => {
                self.source_url = Some(url);
                self.load_source().await
            }
            Property::MovementId(id) => {
                self.movement_id = Some(id).filter(|id| !id.is_empty());
                self.load_source().await
            }
            Property::ElementId(id) => self.goto_element(&id),
            Property::MeasureNumber(number) => self.goto_measure(&number),
            Property::MdivName(name) => {
                debug!(scope = %name, "navigation scope staged");
                self.scope = Some(name).filter(|name| !name.is_empty());
                Ok(())
            }
            Property::EngineUrl(url) => {
                debug!(%url, "engine url staged for next initialization");
                self.engine_url = url;
                Ok(())
            }
            Property::EngineOptions(Some(options)) => {
                self.state.merge_options(options);
                self.reload()
            }
            Property::Zoom(None)
            | Property::PageNumber(None)
            | Property::PageWidth(None)
            | Property::PageHeight(None)
            | Property::EngineOptions(None) => Ok(()),
        }
    }

    /// Failed events roll the view state back so the last valid render stays
    /// in place; the failure only reaches the log.
    fn settle(&mut self, before: ViewState, result: ViewerResult<()>, action: &str) {
        let Err(err) = result else {
            return;
        };
        if err.is_lookup_miss() {
            warn!(action, error = %err, "navigation target not found, request dropped");
        } else {
            warn!(action, error = %err, "keeping last valid view");
        }
        self.state = before;
        if err.touched_engine() {
            self.resync_engine();
        }
    }

    /// Puts the restored options and the current document back into the
    /// engine so later renders match the state.
    fn resync_engine(&mut self) {
        let EngineHandle::Ready(engine) = &mut self.engine else {
            return;
        };
        if let Err(err) = engine.set_options(self.state.options()) {
            warn!(error = %format!("{err:#}"), "engine rejected restored options");
            return;
        }
        if let Some(document) = &self.document {
            if let Err(err) = engine.load_data(&document.text) {
                warn!(error = %format!("{err:#}"), "engine failed to reload document");
                return;
            }
        }
        debug!("engine resynced after failure");
    }

    fn emit(&self, notification: Notification) {
        self.events.lock().push(notification);
    }

    fn push_options(&mut self) -> ViewerResult<()> {
        match &mut self.engine {
            EngineHandle::Ready(engine) => engine
                .set_options(self.state.options())
                .map_err(ViewerError::Engine),
            _ => Ok(()),
        }
    }

    fn render(&mut self) -> ViewerResult<()> {
        let EngineHandle::Ready(engine) = &self.engine else {
            debug!("engine not ready, render deferred");
            return Ok(());
        };
        let Some(document) = &self.document else {
            debug!("no document loaded, render deferred");
            return Ok(());
        };

        self.state.set_total_pages(engine.page_count());
        let mut page = engine
            .render_page(self.state.current_page())
            .map_err(ViewerError::Engine)?;
        let markers = document.annotations.place_markers(&mut page);
        debug!(
            page = page.number,
            markers,
            total = self.state.total_pages(),
            "page rendered"
        );
        self.page = Some(page);
        self.emit(Notification::PageInfoUpdate {
            current_page: self.state.current_page(),
            total_pages: self.state.total_pages(),
        });
        Ok(())
    }

    /// Pushes options, reloads the current document and re-renders.
    fn reload(&mut self) -> ViewerResult<()> {
        let EngineHandle::Ready(engine) = &mut self.engine else {
            return Ok(());
        };
        engine
            .set_options(self.state.options())
            .map_err(ViewerError::Engine)?;
        let Some(document) = &self.document else {
            return Ok(());
        };
        engine
            .load_data(&document.text)
            .map_err(ViewerError::Engine)?;
        self.render()
    }

    #[instrument(skip(self))]
    async fn load_source(&mut self) -> ViewerResult<()> {
        let Some(base) = self.source_url.as_deref() else {
            return Ok(());
        };
        let url = navigation_url(base, self.movement_id.as_deref());
        if !self.engine.is_ready() {
            debug!(%url, "engine not ready, fetch deferred");
            return Ok(());
        }

        let text = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|source| ViewerError::Fetch {
                url: url.clone(),
                source,
            })?;
        let document = Document::parse(&url, text)?;

        let engine = self.engine.get_mut()?;
        engine
            .set_options(self.state.options())
            .map_err(ViewerError::Engine)?;
        engine
            .load_data(&document.text)
            .map_err(ViewerError::Engine)?;
        let id = document.id;
        let previous = self.document.replace(document);
        self.state.goto(1);
        if let Err(err) = self.render() {
            self.document = previous;
            return Err(err);
        }
        info!(document = %id, %url, "document loaded");
        self.highlighter.reset();
        Ok(())
    }

    fn goto_element(&mut self, element_id: &str) -> ViewerResult<()> {
        let engine = self.engine.get()?;
        if self.document.is_none() {
            return Err(ViewerError::NoDocument);
        }
        let page = engine.page_with_element(element_id);
        if page == 0 {
            return Err(ViewerError::ElementNotFound(element_id.to_string()));
        }
        self.state.goto(i64::from(page));
        info!(element = element_id, page, "navigated to element");
        self.render()
    }

    fn goto_measure(&mut self, number: &str) -> ViewerResult<()> {
        let document = self.document.as_ref().ok_or(ViewerError::NoDocument)?;
        let measure_id = document
            .index
            .resolve_measure(self.scope.as_deref(), number)?
            .to_string();
        self.goto_element(&measure_id)
    }

    fn resolve_movement(&self, label: &str) -> ViewerResult<String> {
        let document = self.document.as_ref().ok_or(ViewerError::NoDocument)?;
        Ok(document.index.resolve_movement(label)?.to_string())
    }

    pub fn goto_movement(&mut self, label: &str) {
        self.flush_relayout();
        let before = self.state.clone();
        let result = self
            .resolve_movement(label)
            .and_then(|movement_id| self.goto_element(&movement_id));
        self.settle(before, result, "movement");
    }

    pub fn goto(&mut self, page: i64) {
        self.flush_relayout();
        let before = self.state.clone();
        self.state.goto(page);
        let result = self.render();
        self.settle(before, result, "goto");
    }

    pub fn step(&mut self, direction: PageStep) {
        self.flush_relayout();
        let before = self.state.clone();
        if self.state.step(direction) == before.current_page() {
            return;
        }
        let result = self.render();
        self.settle(before, result, "step");
    }

    pub fn adjust_zoom(&mut self, step: ZoomStep) -> u32 {
        let before = self.state.clone();
        self.state.adjust_zoom(step);
        let result = self.push_options().and_then(|_| self.render());
        self.settle(before, result, "zoom");
        self.state.zoom()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.layout.set_viewport(width, height);
        self.layout.request_relayout();
    }

    /// Runs the debounced relayout if its delay has elapsed by `now`.
    pub fn relayout_if_due(&mut self, now: Instant) -> bool {
        if !self.layout.take_due_relayout(now) {
            return false;
        }
        let before = self.state.clone();
        let result = self.relayout();
        self.settle(before, result, "relayout");
        true
    }

    /// Runs a pending relayout right away so a page request that follows
    /// a dimension change resolves against the new pagination.
    fn flush_relayout(&mut self) {
        if let Some(deadline) = self.layout.pending_relayout() {
            debug!("running pending relayout before navigation");
            self.relayout_if_due(deadline);
        }
    }

    fn relayout(&mut self) -> ViewerResult<()> {
        let (width, height) = self.layout.plan(self.state.zoom());
        debug!(width, height, "updating page dimensions");
        // an unknown viewport (0) keeps the previous dimension
        if width > 0 {
            self.state.set_page_width(width);
        }
        if height > 0 {
            self.state.set_page_height(height);
        }
        self.reload()
    }

    /// Syncs page and highlights to a playback position in milliseconds.
    pub fn playback_tick(&mut self, millis: u64) -> Option<HighlightDelta> {
        self.flush_relayout();
        let EngineHandle::Ready(engine) = &self.engine else {
            return None;
        };
        self.document.as_ref()?;
        let answer = engine.elements_at_time(millis);

        let (page, page_changed, elements) = match self.highlighter.plan(
            answer,
            self.state.current_page(),
            self.state.total_pages(),
        ) {
            TickPlan::Ignore => return None,
            TickPlan::Apply {
                page,
                page_changed,
                elements,
            } => (page, page_changed, elements),
        };

        if page_changed {
            // the fresh page carries no highlight flags
            let before = self.state.clone();
            self.state.goto(i64::from(page));
            let result = self.render();
            if result.is_err() {
                self.settle(before, result, "playback");
                return None;
            }
        }

        let rendered = self.page.as_mut()?;
        Some(self.highlighter.apply(rendered, elements, page_changed))
    }

    pub fn render_audio(&self) -> ViewerResult<Vec<u8>> {
        let engine = self.engine.get()?;
        if self.document.is_none() {
            return Err(ViewerError::NoDocument);
        }
        engine.render_to_audio().map_err(ViewerError::Engine)
    }

    pub async fn handle(&mut self, input: ViewerInput) {
        match input {
            ViewerInput::Property { name, value } => {
                self.apply_property(&name, &value).await;
            }
            ViewerInput::Resize { width, height } => self.resize(width, height),
            ViewerInput::PlaybackTick { millis } => {
                self.playback_tick(millis);
            }
            ViewerInput::Step(direction) => self.step(direction),
            ViewerInput::Goto(page) => self.goto(page),
            ViewerInput::Zoom(step) => {
                self.adjust_zoom(step);
            }
        }
    }

    /// Drives the viewer from `inbox` until every sender is gone, firing the
    /// debounced relayout whenever its deadline passes. A relayout still
    /// pending when the inbox closes is run before returning.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ViewerInput>) -> Self {
        loop {
            let deadline = self.layout.pending_relayout();
            tokio::select! {
                biased;
                input = inbox.recv() => match input {
                    Some(input) => self.handle(input).await,
                    None => break,
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.relayout_if_due(Instant::now());
                }
            }
        }

        if let Some(deadline) = self.layout.pending_relayout() {
            tokio::time::sleep_until(deadline).await;
            self.relayout_if_due(Instant::now());
        }
        self
    }
}

/// Appends the movement selector to a source URL.
fn navigation_url(base: &str, movement_id: Option<&str>) -> String {
    match movement_id {
        Some(id) => {
            let separator = if base.contains('?') { '&' } else { '?' };
            let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
            format!("{base}{separator}movementId={encoded}")
        }
        None => base.to_string(),
    }
}
