//! Flattened view of an MEI document: movements, measures and the timed
//! notes inside them. Durations are kept in quarter notes.

use roxmltree::{Document, Node, ParsingOptions};
use scoreview_core::address::{is_element_named, xml_id};
use thiserror::Error;

pub const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_METER: (u32, u32) = (4, 4);

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("malformed MEI: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("document contains no measures")]
    NoMeasures,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: String,
    /// Zero-based staff index inside the system.
    pub staff: usize,
    /// Offset from the start of the measure.
    pub onset: f64,
    pub duration: f64,
    pub pitch: Option<u8>,
    /// Diatonic steps above C0, for vertical placement.
    pub step: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub id: String,
    pub number: Option<String>,
    pub movement: usize,
    /// Every addressable id inside the measure, notes included.
    pub element_ids: Vec<String>,
    pub notes: Vec<Note>,
    /// Event count of the busiest layer.
    pub events: usize,
    pub length: f64,
    pub bpm: f64,
    pub system_break: bool,
    pub page_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub id: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub movements: Vec<Movement>,
    pub measures: Vec<Measure>,
    pub staves: usize,
}

#[derive(Default)]
struct Cursor {
    movement: usize,
    bpm: f64,
    meter: (u32, u32),
    system_break: bool,
    page_break: bool,
}

impl Cursor {
    fn meter_length(&self) -> f64 {
        let (count, unit) = self.meter;
        f64::from(count) * 4.0 / f64::from(unit.max(1))
    }
}

impl Score {
    pub fn parse(text: &str) -> Result<Self, ScoreError> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = Document::parse_with_options(text, options)?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &Document<'_>) -> Result<Self, ScoreError> {
        let mut movements = Vec::new();
        let mut measures = Vec::new();
        let mut staves = 1;
        let mut cursor = Cursor {
            bpm: DEFAULT_BPM,
            meter: DEFAULT_METER,
            ..Default::default()
        };

        for node in doc.descendants().filter(|node| node.is_element()) {
            if inside_measure(&node) {
                continue;
            }
            match node.tag_name().name() {
                "mdiv" => {
                    cursor.movement = movements.len();
                    movements.push(Movement {
                        id: xml_id(&node).map(str::to_string),
                        label: node.attribute("label").map(str::to_string),
                    });
                }
                "scoreDef" => {
                    let defs = node
                        .descendants()
                        .filter(|child| is_element_named(child, "staffDef"))
                        .count();
                    staves = staves.max(defs);
                    read_score_def(&node, &mut cursor);
                }
                "staffDef" => read_score_def(&node, &mut cursor),
                "sb" => cursor.system_break = true,
                "pb" => cursor.page_break = true,
                "measure" => {
                    let measure = parse_measure(&node, measures.len(), &mut cursor);
                    staves = staves.max(
                        measure
                            .notes
                            .iter()
                            .map(|note| note.staff + 1)
                            .max()
                            .unwrap_or(1),
                    );
                    measures.push(measure);
                }
                _ => {}
            }
        }

        if measures.is_empty() {
            return Err(ScoreError::NoMeasures);
        }
        if movements.is_empty() {
            movements.push(Movement {
                id: None,
                label: None,
            });
        }
        Ok(Self {
            movements,
            measures,
            staves,
        })
    }

    /// Index of the first measure belonging to `movement`.
    pub fn first_measure_of(&self, movement: usize) -> Option<usize> {
        self.measures
            .iter()
            .position(|measure| measure.movement == movement)
    }
}

fn inside_measure(node: &Node<'_, '_>) -> bool {
    node.ancestors()
        .skip(1)
        .any(|ancestor| is_element_named(&ancestor, "measure"))
}

fn read_score_def(node: &Node<'_, '_>, cursor: &mut Cursor) {
    if let Some(bpm) = parse_bpm(node) {
        cursor.bpm = bpm;
    }
    let count = node
        .attribute("meter.count")
        .and_then(|raw| raw.trim().parse::<u32>().ok());
    let unit = node
        .attribute("meter.unit")
        .and_then(|raw| raw.trim().parse::<u32>().ok());
    if let (Some(count), Some(unit)) = (count, unit) {
        cursor.meter = (count, unit);
    }
}

fn parse_bpm(node: &Node<'_, '_>) -> Option<f64> {
    node.attribute("midi.bpm")
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|bpm| *bpm > 0.0)
}

fn parse_measure(node: &Node<'_, '_>, index: usize, cursor: &mut Cursor) -> Measure {
    if let Some(bpm) = node
        .descendants()
        .filter(|child| is_element_named(child, "tempo"))
        .find_map(|tempo| parse_bpm(&tempo))
    {
        cursor.bpm = bpm;
    }

    let meter_length = cursor.meter_length();
    let mut notes = Vec::new();
    let mut events = 0;
    let mut length: f64 = 0.0;

    let staves = node
        .children()
        .filter(|child| is_element_named(child, "staff"));
    for (position, staff) in staves.enumerate() {
        let staff_index = staff
            .attribute("n")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .unwrap_or(position);
        for layer in staff
            .children()
            .filter(|child| is_element_named(child, "layer"))
        {
            let mut walker = LayerWalker {
                staff: staff_index,
                meter_length,
                offset: 0.0,
                events: 0,
                last_duration: 1.0,
                notes: &mut notes,
            };
            walker.walk(&layer, 1.0);
            events = events.max(walker.events);
            length = length.max(walker.offset);
        }
    }

    let measure = Measure {
        id: xml_id(node)
            .map(str::to_string)
            .unwrap_or_else(|| format!("measure-{}", index + 1)),
        number: node.attribute("n").map(|n| n.trim().to_string()),
        movement: cursor.movement,
        element_ids: node
            .descendants()
            .skip(1)
            .filter_map(|child| xml_id(&child).map(str::to_string))
            .collect(),
        notes,
        events,
        length: if length > 0.0 { length } else { meter_length },
        bpm: cursor.bpm,
        system_break: cursor.system_break,
        page_break: cursor.page_break,
    };
    cursor.system_break = false;
    cursor.page_break = false;
    measure
}

struct LayerWalker<'n> {
    staff: usize,
    meter_length: f64,
    offset: f64,
    events: usize,
    /// Notes without @dur inherit the previous duration.
    last_duration: f64,
    notes: &'n mut Vec<Note>,
}

impl LayerWalker<'_> {
    fn walk(&mut self, container: &Node<'_, '_>, ratio: f64) {
        for child in container.children().filter(|child| child.is_element()) {
            match child.tag_name().name() {
                "note" if child.has_attribute("grace") => {}
                "note" => {
                    let duration = self.duration_of(&child, ratio);
                    self.push_note(&child, duration);
                    self.advance(duration);
                }
                "chord" => {
                    let duration = self.duration_of(&child, ratio);
                    for note in child
                        .children()
                        .filter(|note| is_element_named(note, "note"))
                    {
                        let own = note_duration(&note).map_or(duration, |own| own * ratio);
                        self.push_note(&note, own);
                    }
                    self.advance(duration);
                }
                "rest" | "space" => {
                    let duration = self.duration_of(&child, ratio);
                    self.advance(duration);
                }
                "mRest" | "mSpace" | "multiRest" => self.advance(self.meter_length),
                "tuplet" => {
                    let num = child
                        .attribute("num")
                        .and_then(|raw| raw.parse::<f64>().ok())
                        .filter(|num| *num > 0.0);
                    let numbase = child
                        .attribute("numbase")
                        .and_then(|raw| raw.parse::<f64>().ok())
                        .filter(|numbase| *numbase > 0.0);
                    let inner = match (num, numbase) {
                        (Some(num), Some(numbase)) => ratio * numbase / num,
                        _ => ratio,
                    };
                    self.walk(&child, inner);
                }
                "beam" | "fTrem" | "bTrem" => self.walk(&child, ratio),
                _ => {}
            }
        }
    }

    fn duration_of(&mut self, node: &Node<'_, '_>, ratio: f64) -> f64 {
        if let Some(duration) = note_duration(node) {
            self.last_duration = duration;
        }
        self.last_duration * ratio
    }

    fn push_note(&mut self, node: &Node<'_, '_>, duration: f64) {
        let Some(id) = xml_id(node) else {
            return;
        };
        self.notes.push(Note {
            id: id.to_string(),
            staff: self.staff,
            onset: self.offset,
            duration,
            pitch: midi_pitch(node),
            step: diatonic_step(node),
        });
    }

    fn advance(&mut self, duration: f64) {
        self.offset += duration;
        self.events += 1;
    }
}

/// Written duration in quarter notes, dots included.
pub fn note_duration(node: &Node<'_, '_>) -> Option<f64> {
    let base = match node.attribute("dur")?.trim() {
        "long" => 16.0,
        "breve" => 8.0,
        other => {
            let value = other.parse::<f64>().ok().filter(|value| *value > 0.0)?;
            4.0 / value
        }
    };
    let dots = node
        .attribute("dots")
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .unwrap_or(0)
        .clamp(0, 4);
    Some(base * (2.0 - 0.5f64.powi(dots)))
}

pub fn midi_pitch(node: &Node<'_, '_>) -> Option<u8> {
    let class = match node.attribute("pname")?.trim() {
        "c" => 0,
        "d" => 2,
        "e" => 4,
        "f" => 5,
        "g" => 7,
        "a" => 9,
        "b" => 11,
        _ => return None,
    };
    let octave: i32 = node.attribute("oct")?.trim().parse().ok()?;
    let alteration = accidental(node).unwrap_or(0);
    let pitch = 12 * (octave + 1) + class + alteration;
    u8::try_from(pitch).ok().filter(|pitch| *pitch < 128)
}

pub fn diatonic_step(node: &Node<'_, '_>) -> Option<i32> {
    let index = match node.attribute("pname")?.trim() {
        "c" => 0,
        "d" => 1,
        "e" => 2,
        "f" => 3,
        "g" => 4,
        "a" => 5,
        "b" => 6,
        _ => return None,
    };
    let octave: i32 = node.attribute("oct")?.trim().parse().ok()?;
    Some(octave * 7 + index)
}

fn accidental(node: &Node<'_, '_>) -> Option<i32> {
    let own = node
        .attribute("accid.ges")
        .or_else(|| node.attribute("accid"));
    let child = || {
        node.children()
            .filter(|child| is_element_named(child, "accid"))
            .find_map(|accid| accid.attribute("accid.ges").or_else(|| accid.attribute("accid")))
    };
    let value = match own.or_else(child)? {
        "s" => 1,
        "f" => -1,
        "ss" | "x" => 2,
        "ff" => -2,
        "n" => 0,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MOVEMENTS: &str = r#"<mei xmlns="http://www.music-encoding.org/ns/mei">
      <music><body>
        <mdiv xml:id="mv1" label="Allegro"><score>
          <scoreDef meter.count="3" meter.unit="4" midi.bpm="90">
            <staffGrp><staffDef n="1"/><staffDef n="2"/></staffGrp>
          </scoreDef>
          <section>
            <measure n="1" xml:id="m1">
              <staff n="1"><layer>
                <note xml:id="n1" pname="c" oct="4" dur="4"/>
                <note xml:id="n2" pname="f" oct="4" dur="4" dots="1" accid="s"/>
                <note xml:id="n3" pname="g" oct="4" dur="8"/>
              </layer></staff>
              <staff n="2"><layer><mRest xml:id="r1"/></layer></staff>
            </measure>
            <sb/>
            <measure n="2" xml:id="m2">
              <staff n="1"><layer>
                <chord xml:id="c1" dur="2">
                  <note xml:id="n4" pname="e" oct="4"/>
                  <note xml:id="n5" pname="g" oct="4"/>
                </chord>
                <beam><tuplet num="3" numbase="2">
                  <note xml:id="n6" pname="a" oct="4" dur="8"/>
                  <note xml:id="n7" pname="b" oct="4"/>
                  <note xml:id="n8" pname="c" oct="5"><accid accid="f"/></note>
                </tuplet></beam>
              </layer></staff>
            </measure>
          </section>
        </score></mdiv>
        <mdiv xml:id="mv2" label="Adagio"><score><section>
          <measure n="1" xml:id="m3"><tempo midi.bpm="60"/></measure>
        </section></score></mdiv>
      </body></music>
    </mei>"#;

    #[test]
    fn measures_carry_movement_and_breaks() {
        let score = Score::parse(TWO_MOVEMENTS).unwrap();
        assert_eq!(score.movements.len(), 2);
        assert_eq!(score.staves, 2);
        let ids: Vec<_> = score.measures.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        assert!(!score.measures[0].system_break);
        assert!(score.measures[1].system_break);
        assert_eq!(score.measures[2].movement, 1);
        assert_eq!(score.first_measure_of(1), Some(2));
    }

    #[test]
    fn durations_follow_dots_and_tuplets() {
        let score = Score::parse(TWO_MOVEMENTS).unwrap();
        let first = &score.measures[0];
        assert_eq!(first.length, 3.0);
        assert_eq!(first.notes[1].onset, 1.0);
        assert_eq!(first.notes[1].duration, 1.5);
        assert_eq!(first.notes[2].onset, 2.5);

        let second = &score.measures[1];
        assert_eq!(second.notes[0].onset, 0.0);
        assert_eq!(second.notes[1].onset, 0.0);
        assert_eq!(second.events, 4);
        let tuplet_note = &second.notes[3];
        assert!((tuplet_note.duration - 1.0 / 3.0).abs() < 1e-9);
        assert!((second.length - 3.0).abs() < 1e-9);
    }

    #[test]
    fn pitches_apply_accidentals() {
        let score = Score::parse(TWO_MOVEMENTS).unwrap();
        let pitches: Vec<_> = score.measures[0].notes.iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, [Some(60), Some(66), Some(67)]);
        assert_eq!(score.measures[1].notes[4].pitch, Some(71));
    }

    #[test]
    fn tempo_and_meter_are_tracked() {
        let score = Score::parse(TWO_MOVEMENTS).unwrap();
        assert_eq!(score.measures[0].bpm, 90.0);
        assert_eq!(score.measures[2].bpm, 60.0);
        // empty measure falls back to the meter
        assert_eq!(score.measures[2].length, 3.0);
    }

    #[test]
    fn element_ids_cover_nested_content() {
        let score = Score::parse(TWO_MOVEMENTS).unwrap();
        assert!(score.measures[0].element_ids.contains(&"r1".to_string()));
        assert!(score.measures[1].element_ids.contains(&"n8".to_string()));
    }

    #[test]
    fn documents_without_measures_are_rejected() {
        assert!(matches!(
            Score::parse("<mei><music/></mei>"),
            Err(ScoreError::NoMeasures)
        ));
        assert!(matches!(Score::parse("<mei>"), Err(ScoreError::Xml(_))));
    }
}
