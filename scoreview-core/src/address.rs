use std::collections::HashMap;

use roxmltree::Node;

use crate::error::ResolveError;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// `xml:id` of a node, falling back to a bare `id` attribute.
pub fn xml_id<'a>(node: &Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XML_NS, "id")).or_else(|| node.attribute("id"))
}

pub fn is_element_named(node: &Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// Measure numbers are compared as trimmed strings because sources number
/// measures like "12a".
fn normalize_number(number: &str) -> &str {
    number.trim()
}

#[derive(Debug, Clone, Default)]
struct MeasureTable {
    by_number: HashMap<String, Option<String>>,
}

impl MeasureTable {
    fn collect(root: Node<'_, '_>) -> Self {
        let mut by_number = HashMap::new();
        for measure in root
            .descendants()
            .filter(|node| is_element_named(node, "measure"))
        {
            let Some(number) = measure.attribute("n") else {
                continue;
            };
            // first measure in document order wins on duplicate numbers,
            // even when it has no id to navigate to
            by_number
                .entry(normalize_number(number).to_string())
                .or_insert_with(|| xml_id(&measure).map(str::to_string));
        }
        Self { by_number }
    }

    fn get(&self, number: &str) -> Option<&str> {
        self.by_number
            .get(normalize_number(number))
            .and_then(Option::as_deref)
    }
}

#[derive(Debug, Clone)]
struct MovementEntry {
    label: Option<String>,
    id: Option<String>,
    measures: MeasureTable,
}

impl MovementEntry {
    fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        self.label.as_deref().map(str::trim) == Some(key) || self.id.as_deref() == Some(key)
    }
}

/// Logical address lookup built once per document load.
#[derive(Debug, Clone, Default)]
pub struct AddressIndex {
    movements: Vec<MovementEntry>,
    document: MeasureTable,
}

impl AddressIndex {
    pub fn build(doc: &roxmltree::Document<'_>) -> Self {
        let movements = doc
            .descendants()
            .filter(|node| is_element_named(node, "mdiv"))
            .map(|mdiv| MovementEntry {
                label: mdiv.attribute("label").map(str::to_string),
                id: xml_id(&mdiv).map(str::to_string),
                measures: MeasureTable::collect(mdiv),
            })
            .collect();
        Self {
            movements,
            document: MeasureTable::collect(doc.root()),
        }
    }

    fn movement(&self, key: &str) -> Option<&MovementEntry> {
        self.movements.iter().find(|movement| movement.matches(key))
    }

    /// Id of the first measure numbered `number`, searched inside the
    /// movement named by `scope` or across the whole document.
    pub fn resolve_measure(&self, scope: Option<&str>, number: &str) -> Result<&str, ResolveError> {
        let table = match scope {
            Some(scope) => {
                &self
                    .movement(scope)
                    .ok_or_else(|| ResolveError::ScopeNotFound {
                        scope: scope.to_string(),
                    })?
                    .measures
            }
            None => &self.document,
        };
        table.get(number).ok_or_else(|| ResolveError::MeasureNotFound {
            scope: scope.map(str::to_string),
            number: normalize_number(number).to_string(),
        })
    }

    pub fn resolve_movement(&self, label: &str) -> Result<&str, ResolveError> {
        self.movement(label)
            .and_then(|movement| movement.id.as_deref())
            .ok_or_else(|| ResolveError::MovementNotFound {
                label: label.to_string(),
            })
    }

    pub fn movement_labels(&self) -> impl Iterator<Item = &str> {
        self.movements
            .iter()
            .filter_map(|movement| movement.label.as_deref().or(movement.id.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MOVEMENTS: &str = r#"<mei xmlns="http://www.music-encoding.org/ns/mei">
      <music><body>
        <mdiv xml:id="mdiv-1" label="Allegro"><score><section>
          <measure n="1" xml:id="allegro-m1"/>
          <measure n="2" xml:id="allegro-m2"/>
          <measure n="3" xml:id="allegro-m3"/>
        </section></score></mdiv>
        <mdiv xml:id="mdiv-2" label="Adagio"><score><section>
          <measure n="1" xml:id="adagio-m1"/>
          <measure n="2" xml:id="adagio-m2"/>
          <measure n="12a" xml:id="adagio-m12a"/>
        </section></score></mdiv>
      </body></music>
    </mei>"#;

    fn index(xml: &str) -> AddressIndex {
        let doc = roxmltree::Document::parse(xml).unwrap();
        AddressIndex::build(&doc)
    }

    #[test]
    fn scope_narrows_measure_lookup() {
        let index = index(TWO_MOVEMENTS);
        assert_eq!(index.resolve_measure(Some("Adagio"), "1"), Ok("adagio-m1"));
        assert_eq!(index.resolve_measure(Some("Allegro"), "1"), Ok("allegro-m1"));
        assert_eq!(index.resolve_measure(Some("mdiv-2"), "2"), Ok("adagio-m2"));
    }

    #[test]
    fn unscoped_lookup_takes_first_in_document_order() {
        let index = index(TWO_MOVEMENTS);
        for _ in 0..3 {
            assert_eq!(index.resolve_measure(None, "1"), Ok("allegro-m1"));
        }
    }

    #[test]
    fn non_numeric_numbers_compare_as_strings() {
        let index = index(TWO_MOVEMENTS);
        assert_eq!(index.resolve_measure(None, " 12a "), Ok("adagio-m12a"));
        assert!(index.resolve_measure(None, "12").is_err());
    }

    #[test]
    fn scope_miss_is_distinguished_from_measure_miss() {
        let index = index(TWO_MOVEMENTS);
        assert_eq!(
            index.resolve_measure(Some("Presto"), "1"),
            Err(ResolveError::ScopeNotFound {
                scope: "Presto".into()
            })
        );
        assert_eq!(
            index.resolve_measure(Some("Allegro"), "12a"),
            Err(ResolveError::MeasureNotFound {
                scope: Some("Allegro".into()),
                number: "12a".into()
            })
        );
    }

    #[test]
    fn duplicate_numbers_resolve_to_first_occurrence() {
        let index = index(
            r#"<mei><mdiv label="A">
                 <measure n="4" xml:id="first"/>
                 <measure n="4" xml:id="second"/>
               </mdiv></mei>"#,
        );
        assert_eq!(index.resolve_measure(Some("A"), "4"), Ok("first"));
        assert_eq!(index.resolve_measure(None, "4"), Ok("first"));
    }

    #[test]
    fn unaddressable_first_match_is_a_miss() {
        let index = index(
            r#"<mei><mdiv label="A">
                 <measure n="7"/>
                 <measure n="7" xml:id="later"/>
               </mdiv></mei>"#,
        );
        assert_eq!(
            index.resolve_measure(Some("A"), "7"),
            Err(ResolveError::MeasureNotFound {
                scope: Some("A".into()),
                number: "7".into()
            })
        );
        assert!(index.resolve_measure(None, "7").is_err());
    }

    #[test]
    fn labels_with_quotes_need_no_escaping() {
        let index = index(
            r#"<mei><mdiv xml:id="q" label='Scherzo "alla marcia"'>
                 <measure n="1" xml:id="s1"/>
               </mdiv></mei>"#,
        );
        assert_eq!(
            index.resolve_measure(Some(r#"Scherzo "alla marcia""#), "1"),
            Ok("s1")
        );
    }

    #[test]
    fn movement_lookup_returns_movement_id() {
        let index = index(TWO_MOVEMENTS);
        assert_eq!(index.resolve_movement("Adagio"), Ok("mdiv-2"));
        assert_eq!(
            index.resolve_movement("Finale"),
            Err(ResolveError::MovementNotFound {
                label: "Finale".into()
            })
        );
        assert_eq!(
            index.movement_labels().collect::<Vec<_>>(),
            vec!["Allegro", "Adagio"]
        );
    }
}
