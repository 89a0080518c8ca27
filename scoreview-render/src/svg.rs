use scoreview_core::{BoundingBox, RenderedMeasure};

use crate::layout::{LayoutParams, PageLayout, MEASURE_PADDING, STAFF_HEIGHT, UNIT};
use crate::score::Score;

const INK: &str = "#000000";
/// B4, the middle line of a treble staff.
const MIDDLE_LINE_STEP: i32 = 4 * 7 + 6;
const NOTEHEAD_RX: f64 = 0.65 * UNIT;
const NOTEHEAD_RY: f64 = 0.45 * UNIT;

struct SvgBuilder {
    elements: Vec<String>,
    width: f64,
    height: f64,
    scale: f64,
}

impl SvgBuilder {
    fn new(width: f64, height: f64, scale: f64) -> Self {
        Self {
            elements: Vec::new(),
            width,
            height,
            scale,
        }
    }

    fn build(self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{:.0}" height="{:.0}">"#,
            self.width,
            self.height,
            self.width * self.scale / 100.0,
            self.height * self.scale / 100.0
        );
        svg.push('\n');
        for element in &self.elements {
            svg.push_str(element);
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }

    fn open_group(&mut self, id: Option<&str>, class: &str) {
        match id {
            Some(id) => self
                .elements
                .push(format!(r#"<g id="{}" class="{class}">"#, escape(id))),
            None => self.elements.push(format!(r#"<g class="{class}">"#)),
        }
    }

    fn close_group(&mut self) {
        self.elements.push("</g>".to_string());
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64) {
        self.elements.push(format!(
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{INK}" stroke-width="{width:.1}"/>"#
        ));
    }

    fn notehead(&mut self, cx: f64, cy: f64) {
        self.elements.push(format!(
            r#"<ellipse cx="{cx:.1}" cy="{cy:.1}" rx="{NOTEHEAD_RX:.1}" ry="{NOTEHEAD_RY:.1}" fill="{INK}" transform="rotate(-15,{cx:.1},{cy:.1})"/>"#
        ));
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64) {
        self.elements.push(format!(
            r#"<text x="{x:.1}" y="{y:.1}" font-size="{size:.0}" fill="{INK}">{}</text>"#,
            escape(content)
        ));
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Markup and staff boxes for one laid-out page.
pub fn render(
    score: &Score,
    page: &PageLayout,
    params: &LayoutParams,
) -> (String, Vec<RenderedMeasure>) {
    let mut svg = SvgBuilder::new(params.page_width, params.page_height, params.scale);
    let mut measures = Vec::new();
    let staves_height = params.staves_height(score.staves);

    for system in &page.systems {
        svg.open_group(None, "system");
        for placed in &system.measures {
            let measure = &score.measures[placed.index];
            let right = placed.x + placed.width;
            svg.open_group(Some(&measure.id), "measure");

            for staff in 0..score.staves.max(1) {
                let top = params.staff_top(system.y, staff);
                svg.open_group(None, "staff");
                for line in 0..5 {
                    let y = top + f64::from(line) * UNIT;
                    svg.line(placed.x, y, right, y, 2.0);
                }
                svg.close_group();
            }
            svg.line(right, system.y, right, system.y + staves_height, 4.0);
            if let Some(number) = &measure.number {
                svg.text(placed.x, system.y - UNIT, number, 1.5 * UNIT);
            }

            let usable = (placed.width - MEASURE_PADDING).max(0.0);
            for note in &measure.notes {
                let fraction = if measure.length > 0.0 {
                    note.onset / measure.length
                } else {
                    0.0
                };
                let cx = placed.x + MEASURE_PADDING / 2.0 + fraction * usable;
                let middle = params.staff_top(system.y, note.staff) + STAFF_HEIGHT / 2.0;
                let offset = note.step.map_or(0, |step| step - MIDDLE_LINE_STEP);
                let cy = middle - f64::from(offset) * UNIT / 2.0;
                svg.open_group(Some(&note.id), "note");
                svg.notehead(cx, cy);
                svg.close_group();
            }

            svg.close_group();
            measures.push(RenderedMeasure {
                id: measure.id.clone(),
                staff_bbox: BoundingBox {
                    x: placed.x,
                    y: system.y,
                    width: placed.width,
                    height: staves_height,
                },
            });
        }
        svg.close_group();
    }

    (svg.build(), measures)
}
