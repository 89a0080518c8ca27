pub mod layout;
pub mod midi;
pub mod score;
pub mod svg;
pub mod timemap;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use scoreview_core::config::default_engine_options;
use scoreview_core::{
    DocumentFetcher, EngineLoader, EngineOptions, RenderedPage, RenderingEngine, TimedElements,
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::layout::{paginate, LayoutParams, PageLayout};
use crate::score::Score;
use crate::timemap::Timemap;

pub const ENGINE_VERSION: &str = concat!("scoreview-mei ", env!("CARGO_PKG_VERSION"));

/// Native MEI engine: parses, paginates and renders SVG pages in process.
pub struct MeiEngine {
    options: EngineOptions,
    score: Option<Score>,
    timemap: Timemap,
    pages: Vec<PageLayout>,
    element_pages: HashMap<String, u32>,
    generation: u64,
    cache: Mutex<Option<RenderCacheEntry>>,
}

struct RenderCacheEntry {
    page: u32,
    generation: u64,
    rendered: RenderedPage,
}

impl Default for MeiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MeiEngine {
    pub fn new() -> Self {
        Self {
            options: default_engine_options(),
            score: None,
            timemap: Timemap::default(),
            pages: Vec::new(),
            element_pages: HashMap::new(),
            generation: 0,
            cache: Mutex::new(None),
        }
    }

    fn params(&self) -> LayoutParams {
        LayoutParams::from_options(&self.options)
    }

    fn relayout(&mut self) {
        self.generation += 1;
        let Some(score) = &self.score else {
            return;
        };
        self.pages = paginate(score, &self.params());

        let mut measure_pages = vec![0; score.measures.len()];
        self.element_pages.clear();
        for (number, page) in (1u32..).zip(&self.pages) {
            for index in page.measure_indices() {
                measure_pages[index] = number;
                let measure = &score.measures[index];
                self.element_pages.insert(measure.id.clone(), number);
                for id in &measure.element_ids {
                    self.element_pages.entry(id.clone()).or_insert(number);
                }
            }
        }
        for (position, movement) in score.movements.iter().enumerate() {
            let (Some(id), Some(first)) = (&movement.id, score.first_measure_of(position)) else {
                continue;
            };
            self.element_pages.insert(id.clone(), measure_pages[first]);
        }
        debug!(
            pages = self.pages.len(),
            generation = self.generation,
            "score laid out"
        );
    }

    fn measure_page(&self, measure: usize) -> u32 {
        self.score
            .as_ref()
            .and_then(|score| score.measures.get(measure))
            .and_then(|measure| self.element_pages.get(&measure.id))
            .copied()
            .unwrap_or(0)
    }
}

impl RenderingEngine for MeiEngine {
    fn version(&self) -> String {
        ENGINE_VERSION.to_string()
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    fn load_data(&mut self, data: &str) -> Result<()> {
        let score = Score::parse(data)?;
        info!(
            measures = score.measures.len(),
            movements = score.movements.len(),
            "score loaded"
        );
        self.timemap = Timemap::build(&score);
        self.score = Some(score);
        self.relayout();
        Ok(())
    }

    fn set_options(&mut self, options: &EngineOptions) -> Result<()> {
        for (key, value) in options {
            self.options.insert(key.clone(), value.clone());
        }
        self.relayout();
        Ok(())
    }

    fn options(&self) -> EngineOptions {
        self.options.clone()
    }

    #[instrument(skip(self))]
    fn render_page(&self, page: u32) -> Result<RenderedPage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page == page && entry.generation == self.generation {
                    return Ok(entry.rendered.clone());
                }
            }
        }

        let score = self
            .score
            .as_ref()
            .ok_or_else(|| anyhow!("no score loaded"))?;
        let layout = usize::try_from(page)
            .ok()
            .and_then(|page| page.checked_sub(1))
            .and_then(|index| self.pages.get(index))
            .with_context(|| format!("page {page} out of range"))?;

        let (markup, measures) = svg::render(score, layout, &self.params());
        let element_ids: Vec<String> = layout
            .measure_indices()
            .flat_map(|index| score.measures[index].element_ids.iter().cloned())
            .collect();
        let rendered = RenderedPage::new(page, markup, measures, element_ids);

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page,
            generation: self.generation,
            rendered: rendered.clone(),
        });
        Ok(rendered)
    }

    fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn page_with_element(&self, element_id: &str) -> u32 {
        self.element_pages.get(element_id).copied().unwrap_or(0)
    }

    fn elements_at_time(&self, millis: u64) -> TimedElements {
        let mut sounding = self.timemap.sounding_at(millis).peekable();
        let Some(first) = sounding.peek() else {
            return TimedElements::default();
        };
        let page = self.measure_page(first.measure);
        let elements: BTreeSet<String> = sounding
            .filter(|note| self.measure_page(note.measure) == page)
            .map(|note| note.id.clone())
            .collect();
        TimedElements { page, elements }
    }

    fn render_to_audio(&self) -> Result<Vec<u8>> {
        let score = self
            .score
            .as_ref()
            .ok_or_else(|| anyhow!("no score loaded"))?;
        Ok(midi::encode_score(score))
    }
}

/// Starts a [`MeiEngine`]. The engine runs in process, so the toolkit URL
/// is only validated and logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeiEngineLoader;

#[async_trait]
impl EngineLoader for MeiEngineLoader {
    async fn load(&self, engine_url: &str) -> Result<Box<dyn RenderingEngine>> {
        if engine_url.trim().is_empty() {
            return Err(anyhow!("engine url is empty"));
        }
        match Url::parse(engine_url) {
            Ok(url) => debug!(host = url.host_str(), "engine url accepted"),
            Err(_) => debug!(engine_url, "engine url is a local reference"),
        }
        Ok(Box::new(MeiEngine::new()))
    }
}

/// Reads documents from the local filesystem. Relative paths resolve
/// against `base` when one is given.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    pub fn resolve(&self, location: &str) -> Result<PathBuf> {
        if let Ok(url) = Url::parse(location) {
            match url.scheme() {
                "file" => {
                    return url
                        .to_file_path()
                        .map_err(|_| anyhow!("invalid file url {location}"));
                }
                // single letters are drive prefixes, not schemes
                scheme if scheme.len() > 1 => {
                    return Err(anyhow!("unsupported scheme {scheme:?} for {location}"));
                }
                _ => {}
            }
        }
        let path = Path::new(location.split('?').next().unwrap_or(location));
        Ok(match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        })
    }
}

#[async_trait]
impl DocumentFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let path = self.resolve(url)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {:?}", path))
    }
}
