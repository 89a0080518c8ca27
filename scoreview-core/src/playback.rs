use std::collections::BTreeSet;

use crate::engine::{RenderedPage, TimedElements};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    /// No active position at this time.
    Ignore,
    Apply {
        page: u32,
        page_changed: bool,
        elements: BTreeSet<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightDelta {
    pub page_changed: bool,
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

/// Tracks which elements sounded on the previous playback tick.
#[derive(Debug, Clone, Default)]
pub struct PlaybackHighlighter {
    highlight: BTreeSet<String>,
}

impl PlaybackHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlight_set(&self) -> &BTreeSet<String> {
        &self.highlight
    }

    pub fn reset(&mut self) {
        self.highlight.clear();
    }

    /// Compares the engine answer against the page shown before this tick.
    /// A page outside `1..=total_pages` counts as no active position.
    pub fn plan(&self, answer: TimedElements, current_page: u32, total_pages: u32) -> TickPlan {
        if answer.page == 0 || answer.page > total_pages {
            return TickPlan::Ignore;
        }
        TickPlan::Apply {
            page: answer.page,
            page_changed: answer.page != current_page,
            elements: answer.elements,
        }
    }

    /// Clears the previous tick's flags that are still on `page`, flags the
    /// new set, and replaces the remembered set with it.
    pub fn apply(
        &mut self,
        page: &mut RenderedPage,
        elements: BTreeSet<String>,
        page_changed: bool,
    ) -> HighlightDelta {
        for id in &self.highlight {
            if page.contains(id) {
                page.set_highlight(id, false);
            }
        }
        for id in &elements {
            page.set_highlight(id, true);
        }

        let delta = HighlightDelta {
            page_changed,
            added: elements.difference(&self.highlight).cloned().collect(),
            removed: self.highlight.difference(&elements).cloned().collect(),
        };
        self.highlight = elements;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn page(number: u32, elements: &[&str]) -> RenderedPage {
        RenderedPage::new(
            number,
            String::new(),
            Vec::new(),
            elements.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn page_zero_is_ignored() {
        let highlighter = PlaybackHighlighter::new();
        let answer = TimedElements {
            page: 0,
            elements: ids(&["n1"]),
        };
        assert_eq!(highlighter.plan(answer, 3, 5), TickPlan::Ignore);
    }

    #[test]
    fn plan_compares_against_current_page() {
        let highlighter = PlaybackHighlighter::new();
        let answer = TimedElements {
            page: 2,
            elements: ids(&["n1"]),
        };
        assert_eq!(
            highlighter.plan(answer.clone(), 2, 5),
            TickPlan::Apply {
                page: 2,
                page_changed: false,
                elements: ids(&["n1"])
            }
        );
        assert!(matches!(
            highlighter.plan(answer, 1, 5),
            TickPlan::Apply {
                page_changed: true,
                ..
            }
        ));
    }

    #[test]
    fn pages_past_the_end_are_ignored() {
        let highlighter = PlaybackHighlighter::new();
        let answer = TimedElements {
            page: 6,
            elements: ids(&["n1"]),
        };
        assert_eq!(highlighter.plan(answer.clone(), 5, 5), TickPlan::Ignore);
        assert!(matches!(
            highlighter.plan(answer, 5, 6),
            TickPlan::Apply { page: 6, .. }
        ));
    }

    #[test]
    fn consecutive_ticks_replace_highlights() {
        let mut highlighter = PlaybackHighlighter::new();
        let mut page = page(1, &["n1", "n2", "n3"]);

        highlighter.apply(&mut page, ids(&["n1", "n2"]), false);
        let delta = highlighter.apply(&mut page, ids(&["n2", "n3"]), false);

        assert_eq!(page.highlighted(), &ids(&["n2", "n3"]));
        assert_eq!(delta.added, ids(&["n3"]));
        assert_eq!(delta.removed, ids(&["n1"]));
        assert_eq!(highlighter.highlight_set(), &ids(&["n2", "n3"]));
    }

    #[test]
    fn vanished_elements_are_skipped_when_clearing() {
        let mut highlighter = PlaybackHighlighter::new();
        let mut first = page(1, &["n1"]);
        highlighter.apply(&mut first, ids(&["n1"]), false);

        let mut second = page(2, &["n9"]);
        let delta = highlighter.apply(&mut second, ids(&["n9"]), true);

        assert!(delta.page_changed);
        assert_eq!(second.highlighted(), &ids(&["n9"]));
        assert_eq!(delta.removed, ids(&["n1"]));
    }
}
