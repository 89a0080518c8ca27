//! The closed set of externally writable viewer properties.

use serde_json::Value;

use crate::config::EngineOptions;

pub const PAGE_WIDTH_RANGE: std::ops::RangeInclusive<u32> = 100..=100_000;
pub const PAGE_HEIGHT_RANGE: std::ops::RangeInclusive<u32> = 100..=60_000;

/// Parses the leading integer of `raw` the way attribute values are read:
/// surrounding whitespace and trailing garbage such as unit suffixes are
/// ignored, input without leading digits yields `None`.
pub fn parse_int_lenient(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionInput {
    Length(u32),
    /// Empty value: drop the override and follow the viewport again.
    Clear,
    Invalid,
}

impl DimensionInput {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return DimensionInput::Clear;
        }
        match parse_int_lenient(raw).and_then(|value| u32::try_from(value).ok()) {
            Some(length) if length > 0 => DimensionInput::Length(length),
            _ => DimensionInput::Invalid,
        }
    }

    pub fn length(self) -> Option<u32> {
        match self {
            DimensionInput::Length(length) => Some(length),
            DimensionInput::Clear | DimensionInput::Invalid => None,
        }
    }
}

/// What a write does once applied. `Stage` writes only change configuration
/// and wait for a later trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEffect {
    Render,
    Relayout,
    ReloadAndRender,
    Fetch,
    Navigate,
    Stage,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Zoom(Option<i64>),
    PageNumber(Option<i64>),
    Width(DimensionInput),
    Height(DimensionInput),
    /// `None` when unparseable or outside [`PAGE_WIDTH_RANGE`].
    PageWidth(Option<u32>),
    PageHeight(Option<u32>),
    SourceUrl(String),
    MovementId(String),
    ElementId(String),
    MeasureNumber(String),
    MdivName(String),
    EngineUrl(String),
    EngineOptions(Option<EngineOptions>),
}

impl Property {
    /// Coerces a raw write. Unknown names return `None`.
    pub fn parse(name: &str, raw: &str) -> Option<Self> {
        let property = match name.trim().to_ascii_lowercase().as_str() {
            "zoom" => Property::Zoom(parse_int_lenient(raw)),
            "pagenumber" => Property::PageNumber(parse_int_lenient(raw)),
            "width" => Property::Width(DimensionInput::parse(raw)),
            "height" => Property::Height(DimensionInput::parse(raw)),
            "pagewidth" => Property::PageWidth(parse_in_range(raw, &PAGE_WIDTH_RANGE)),
            "pageheight" => Property::PageHeight(parse_in_range(raw, &PAGE_HEIGHT_RANGE)),
            "meiurl" | "sourceurl" => Property::SourceUrl(raw.trim().to_string()),
            "movementid" => Property::MovementId(raw.trim().to_string()),
            "elementid" => Property::ElementId(raw.trim().to_string()),
            "measurenumber" => Property::MeasureNumber(raw.trim().to_string()),
            "mdivname" => Property::MdivName(raw.trim().to_string()),
            "verovio-url" => Property::EngineUrl(raw.trim().to_string()),
            "verovio-options" => Property::EngineOptions(parse_options(raw)),
            _ => return None,
        };
        Some(property)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Property::Zoom(_) => "zoom",
            Property::PageNumber(_) => "pagenumber",
            Property::Width(_) => "width",
            Property::Height(_) => "height",
            Property::PageWidth(_) => "pagewidth",
            Property::PageHeight(_) => "pageheight",
            Property::SourceUrl(_) => "meiurl",
            Property::MovementId(_) => "movementid",
            Property::ElementId(_) => "elementid",
            Property::MeasureNumber(_) => "measurenumber",
            Property::MdivName(_) => "mdivname",
            Property::EngineUrl(_) => "verovio-url",
            Property::EngineOptions(_) => "verovio-options",
        }
    }

    /// Effect table. Invalid payloads map to `Ignore` so they never reach the
    /// view state.
    pub fn effect(&self) -> PropertyEffect {
        match self {
            Property::Zoom(Some(_)) | Property::PageNumber(Some(_)) => PropertyEffect::Render,
            Property::Zoom(None) | Property::PageNumber(None) => PropertyEffect::Ignore,
            Property::Width(DimensionInput::Invalid) | Property::Height(DimensionInput::Invalid) => {
                PropertyEffect::Ignore
            }
            Property::Width(_) | Property::Height(_) => PropertyEffect::Relayout,
            Property::PageWidth(Some(_)) | Property::PageHeight(Some(_)) => {
                PropertyEffect::ReloadAndRender
            }
            Property::PageWidth(None) | Property::PageHeight(None) => PropertyEffect::Ignore,
            Property::SourceUrl(url) if url.is_empty() => PropertyEffect::Ignore,
            Property::SourceUrl(_) | Property::MovementId(_) => PropertyEffect::Fetch,
            Property::ElementId(id) | Property::MeasureNumber(id) if id.is_empty() => {
                PropertyEffect::Ignore
            }
            Property::ElementId(_) | Property::MeasureNumber(_) => PropertyEffect::Navigate,
            Property::MdivName(_) | Property::EngineUrl(_) => PropertyEffect::Stage,
            Property::EngineOptions(Some(_)) => PropertyEffect::ReloadAndRender,
            Property::EngineOptions(None) => PropertyEffect::Ignore,
        }
    }

    /// Writes whose target page depends on the current pagination.
    pub fn targets_page(&self) -> bool {
        matches!(
            self,
            Property::PageNumber(_) | Property::ElementId(_) | Property::MeasureNumber(_)
        )
    }
}

fn parse_in_range(raw: &str, range: &std::ops::RangeInclusive<u32>) -> Option<u32> {
    parse_int_lenient(raw)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| range.contains(value))
}

fn parse_options(raw: &str) -> Option<EngineOptions> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_integers_follow_attribute_parsing() {
        assert_eq!(parse_int_lenient("42"), Some(42));
        assert_eq!(parse_int_lenient("  -7"), Some(-7));
        assert_eq!(parse_int_lenient("+3"), Some(3));
        assert_eq!(parse_int_lenient("800px"), Some(800));
        assert_eq!(parse_int_lenient("12.9"), Some(12));
        assert_eq!(parse_int_lenient("px800"), None);
        assert_eq!(parse_int_lenient(""), None);
        assert_eq!(parse_int_lenient("-"), None);
        assert_eq!(parse_int_lenient("99999999999999999999999"), None);
    }

    #[test]
    fn unknown_names_are_not_properties() {
        assert_eq!(Property::parse("colour", "red"), None);
        assert_eq!(Property::parse("", "1"), None);
    }

    #[test]
    fn names_are_case_insensitive_and_aliased() {
        assert_eq!(
            Property::parse("MeiUrl", " a.mei "),
            Some(Property::SourceUrl("a.mei".into()))
        );
        assert_eq!(
            Property::parse("sourceurl", "b.mei"),
            Some(Property::SourceUrl("b.mei".into()))
        );
    }

    #[test]
    fn dimension_inputs_strip_units() {
        assert_eq!(
            Property::parse("width", "640px"),
            Some(Property::Width(DimensionInput::Length(640)))
        );
        assert_eq!(
            Property::parse("height", ""),
            Some(Property::Height(DimensionInput::Clear))
        );
        assert_eq!(
            Property::parse("height", "tall"),
            Some(Property::Height(DimensionInput::Invalid))
        );
        assert_eq!(
            Property::parse("width", "-20"),
            Some(Property::Width(DimensionInput::Invalid))
        );
    }

    #[test]
    fn page_dimensions_outside_range_are_rejected() {
        assert_eq!(Property::parse("pagewidth", "99"), Some(Property::PageWidth(None)));
        assert_eq!(
            Property::parse("pagewidth", "100000"),
            Some(Property::PageWidth(Some(100_000)))
        );
        assert_eq!(
            Property::parse("pageheight", "60001"),
            Some(Property::PageHeight(None))
        );
        assert_eq!(
            Property::parse("pageheight", "nan"),
            Some(Property::PageHeight(None))
        );
    }

    #[test]
    fn effect_table_stages_scope_without_rendering() {
        let table = [
            ("zoom", "30", PropertyEffect::Render),
            ("zoom", "abc", PropertyEffect::Ignore),
            ("pagenumber", "2", PropertyEffect::Render),
            ("width", "800", PropertyEffect::Relayout),
            ("height", "", PropertyEffect::Relayout),
            ("pagewidth", "2000", PropertyEffect::ReloadAndRender),
            ("pageheight", "5", PropertyEffect::Ignore),
            ("meiurl", "x.mei", PropertyEffect::Fetch),
            ("movementid", "mdiv-2", PropertyEffect::Fetch),
            ("elementid", "note-1", PropertyEffect::Navigate),
            ("measurenumber", "12", PropertyEffect::Navigate),
            ("mdivname", "Adagio", PropertyEffect::Stage),
            ("verovio-url", "toolkit.js", PropertyEffect::Stage),
            ("verovio-options", r#"{"breaks":"none"}"#, PropertyEffect::ReloadAndRender),
            ("verovio-options", "[1,2]", PropertyEffect::Ignore),
        ];
        for (name, raw, effect) in table {
            let property = Property::parse(name, raw).unwrap();
            assert_eq!(property.effect(), effect, "{name}={raw}");
        }
    }
}
