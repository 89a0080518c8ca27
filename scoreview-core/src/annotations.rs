//! Annotation categories, their colors, and the overlay markers drawn above
//! measures that carry annotations.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::address::{is_element_named, xml_id};
use crate::engine::RenderedPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub const PALETTE: [Color; 8] = [
    Color::rgb(0xe6, 0x19, 0x4b),
    Color::rgb(0x3c, 0xb4, 0x4b),
    Color::rgb(0x43, 0x63, 0xd8),
    Color::rgb(0xf5, 0x82, 0x31),
    Color::rgb(0x91, 0x1e, 0xb4),
    Color::rgb(0x42, 0xd4, 0xf4),
    Color::rgb(0xf0, 0x32, 0xe6),
    Color::rgb(0x9a, 0x63, 0x24),
];

pub const FALLBACK_COLOR: Color = Color::rgb(0x99, 0x99, 0x99);

pub const MARKER_SIZE: f64 = 180.0;
pub const MARKER_STEP: f64 = 220.0;
pub const MARKER_OFFSET_ABOVE: f64 = 300.0;

/// Category colors assigned in first-seen document order, cycling through
/// [`PALETTE`]. Frozen once built.
#[derive(Debug, Clone, Default)]
pub struct CategoryColorMap {
    colors: HashMap<String, Color>,
    order: Vec<String>,
}

impl CategoryColorMap {
    pub fn from_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::default();
        for category in categories {
            let category = category.into();
            if map.colors.contains_key(&category) {
                continue;
            }
            let color = PALETTE[map.order.len() % PALETTE.len()];
            map.colors.insert(category.clone(), color);
            map.order.push(category);
        }
        map
    }

    pub fn color_for(&self, category: &str) -> Color {
        self.colors.get(category).copied().unwrap_or(FALLBACK_COLOR)
    }

    pub fn categories(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: String,
    pub categories: Vec<String>,
    /// Already placed by the engine (anchored to a timestamp or start element).
    pub positioned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub annotation_id: String,
    pub measure_id: String,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    pub color: Color,
}

/// Annotations of one document keyed by the measures they are attached to.
#[derive(Debug, Clone, Default)]
pub struct AnnotationCatalog {
    annotations: Vec<Annotation>,
    by_measure: HashMap<String, Vec<usize>>,
    colors: CategoryColorMap,
}

impl AnnotationCatalog {
    pub fn build(doc: &roxmltree::Document<'_>) -> Self {
        let mut annotations = Vec::new();
        let mut by_measure: HashMap<String, Vec<usize>> = HashMap::new();
        let mut seen_categories = Vec::new();

        for node in doc.descendants().filter(|node| node.is_element()) {
            if is_element_named(&node, "category") {
                if let Some(id) = xml_id(&node) {
                    seen_categories.push(id.to_string());
                }
                continue;
            }
            if !is_element_named(&node, "annot") {
                continue;
            }
            let Some(id) = xml_id(&node) else {
                continue;
            };

            let categories: Vec<String> = node
                .attribute("class")
                .map(pointer_targets)
                .unwrap_or_default();
            seen_categories.extend(categories.iter().cloned());

            let mut measures: Vec<String> = node
                .attribute("plist")
                .map(pointer_targets)
                .unwrap_or_default();
            if let Some(parent) = node
                .ancestors()
                .skip(1)
                .find(|ancestor| is_element_named(ancestor, "measure"))
            {
                if let Some(measure_id) = xml_id(&parent) {
                    measures.push(measure_id.to_string());
                }
            }

            let index = annotations.len();
            annotations.push(Annotation {
                id: id.to_string(),
                categories,
                positioned: node.has_attribute("tstamp") || node.has_attribute("startid"),
            });
            for measure in measures {
                let attached = by_measure.entry(measure).or_default();
                if !attached.contains(&index) {
                    attached.push(index);
                }
            }
        }

        Self {
            annotations,
            by_measure,
            colors: CategoryColorMap::from_categories(seen_categories),
        }
    }

    pub fn colors(&self) -> &CategoryColorMap {
        &self.colors
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Color of the annotation's first category, or the fallback color.
    pub fn color_for_annotation(&self, annotation: &Annotation) -> Color {
        annotation
            .categories
            .first()
            .map(|category| self.colors.color_for(category))
            .unwrap_or(FALLBACK_COLOR)
    }

    /// Annotations attached to `measure_id` that still need a marker.
    pub fn unpositioned_for_measure<'a>(
        &'a self,
        measure_id: &str,
    ) -> impl Iterator<Item = &'a Annotation> + 'a {
        self.by_measure
            .get(measure_id)
            .into_iter()
            .flatten()
            .map(|&index| &self.annotations[index])
            .filter(|annotation| !annotation.positioned)
    }

    /// Appends one marker per qualifying annotation above each rendered
    /// measure's staff, stepping right for every further annotation.
    pub fn place_markers(&self, page: &mut RenderedPage) -> usize {
        let mut markers = Vec::new();
        for measure in &page.measures {
            for (slot, annotation) in self.unpositioned_for_measure(&measure.id).enumerate() {
                markers.push(Marker {
                    annotation_id: annotation.id.clone(),
                    measure_id: measure.id.clone(),
                    x: measure.staff_bbox.x + MARKER_STEP * slot as f64,
                    y: measure.staff_bbox.y - MARKER_OFFSET_ABOVE,
                    size: MARKER_SIZE,
                    color: self.color_for_annotation(annotation),
                });
            }
        }
        let placed = markers.len();
        for marker in markers {
            page.push_marker(marker);
        }
        placed
    }
}

/// Splits a whitespace separated list of `#id` pointers.
fn pointer_targets(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .map(|target| target.trim_start_matches('#'))
        .filter(|target| !target.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BoundingBox, RenderedMeasure};

    const ANNOTATED: &str = r##"<mei>
      <meiHead><encodingDesc><classDecls><taxonomy>
        <category xml:id="cat-text"/>
        <category xml:id="cat-pitch"/>
      </taxonomy></classDecls></encodingDesc></meiHead>
      <music><body><mdiv><score><section>
        <measure n="1" xml:id="m1">
          <annot xml:id="a-inline" class="#cat-dyn"/>
        </measure>
        <measure n="2" xml:id="m2"/>
      </section></score></mdiv></body></music>
      <annot xml:id="a1" class="#cat-pitch" plist="#m1"/>
      <annot xml:id="a2" class="#cat-text" plist="#m1 #m2"/>
      <annot xml:id="a3" class="#cat-text" plist="#m2" tstamp="1"/>
      <annot xml:id="a4" plist="#m2"/>
    </mei>"##;

    fn catalog() -> AnnotationCatalog {
        let doc = roxmltree::Document::parse(ANNOTATED).unwrap();
        AnnotationCatalog::build(&doc)
    }

    fn staff(id: &str, x: f64, y: f64) -> RenderedMeasure {
        RenderedMeasure {
            id: id.into(),
            staff_bbox: BoundingBox {
                x,
                y,
                width: 1000.0,
                height: 400.0,
            },
        }
    }

    #[test]
    fn categories_colored_in_first_seen_order() {
        let catalog = catalog();
        let colors = catalog.colors();
        assert_eq!(colors.categories(), ["cat-text", "cat-pitch", "cat-dyn"]);
        assert_eq!(colors.color_for("cat-text"), PALETTE[0]);
        assert_eq!(colors.color_for("cat-pitch"), PALETTE[1]);
        assert_eq!(colors.color_for("cat-dyn"), PALETTE[2]);
        assert_eq!(colors.color_for("cat-text"), colors.color_for("cat-text"));
        assert_eq!(colors.color_for("cat-unknown"), FALLBACK_COLOR);
    }

    #[test]
    fn palette_cycles_past_its_length() {
        let names: Vec<String> = (0..PALETTE.len() + 2).map(|i| format!("c{i}")).collect();
        let colors = CategoryColorMap::from_categories(names.clone());
        assert_eq!(colors.color_for(&names[PALETTE.len()]), PALETTE[0]);
        assert_eq!(colors.color_for(&names[PALETTE.len() + 1]), PALETTE[1]);
        assert_eq!(colors.len(), PALETTE.len() + 2);
    }

    #[test]
    fn markers_skip_positioned_annotations() {
        let catalog = catalog();
        let mut page = RenderedPage::new(
            1,
            String::new(),
            vec![staff("m1", 100.0, 1000.0), staff("m2", 1100.0, 1000.0)],
            Vec::new(),
        );

        assert_eq!(catalog.place_markers(&mut page), 5);
        let ids: Vec<_> = page
            .markers()
            .iter()
            .map(|marker| (marker.measure_id.as_str(), marker.annotation_id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("m1", "a-inline"),
                ("m1", "a1"),
                ("m1", "a2"),
                ("m2", "a2"),
                ("m2", "a4"),
            ]
        );
    }

    #[test]
    fn marker_geometry_steps_right_above_staff() {
        let catalog = catalog();
        let mut page =
            RenderedPage::new(1, String::new(), vec![staff("m1", 100.0, 1000.0)], Vec::new());
        catalog.place_markers(&mut page);

        let markers = page.markers();
        assert_eq!(markers.len(), 3);
        for (slot, marker) in markers.iter().enumerate() {
            assert_eq!(marker.x, 100.0 + MARKER_STEP * slot as f64);
            assert_eq!(marker.y, 1000.0 - MARKER_OFFSET_ABOVE);
            assert_eq!(marker.size, MARKER_SIZE);
        }
        assert_eq!(markers[0].color, PALETTE[2]);
        assert_eq!(markers[1].color, PALETTE[1]);
    }

    #[test]
    fn uncategorized_annotation_gets_fallback_color() {
        let catalog = catalog();
        let a4 = catalog
            .annotations()
            .iter()
            .find(|annotation| annotation.id == "a4")
            .unwrap();
        assert_eq!(catalog.color_for_annotation(a4), FALLBACK_COLOR);
        assert_eq!(FALLBACK_COLOR.to_string(), "#999999");
    }
}
