//! Standard MIDI File export of a parsed score.

use crate::score::Score;

pub const TICKS_PER_QUARTER: u16 = 480;
const VELOCITY: u8 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
struct MidiEvent {
    tick: u32,
    /// Offs sort before ons at the same tick so repeated pitches retrigger.
    order: u8,
    bytes: Vec<u8>,
}

/// Single-track (type 0) SMF with one channel per staff.
pub fn encode_score(score: &Score) -> Vec<u8> {
    let mut events = Vec::new();
    let mut start = 0.0;
    let mut tempo = None;

    for measure in &score.measures {
        let tick = quarters_to_ticks(start);
        if tempo != Some(measure.bpm) {
            events.push(tempo_event(tick, measure.bpm));
            tempo = Some(measure.bpm);
        }
        for note in &measure.notes {
            let Some(pitch) = note.pitch else {
                continue;
            };
            let channel = staff_channel(note.staff);
            let on = quarters_to_ticks(start + note.onset);
            let off = quarters_to_ticks(start + note.onset + note.duration).max(on + 1);
            events.push(MidiEvent {
                tick: on,
                order: 2,
                bytes: vec![0x90 | channel, pitch, VELOCITY],
            });
            events.push(MidiEvent {
                tick: off,
                order: 1,
                bytes: vec![0x80 | channel, pitch, 0],
            });
        }
        start += measure.length;
    }

    build_smf(&encode_track(&mut events, "scoreview"))
}

fn quarters_to_ticks(quarters: f64) -> u32 {
    (quarters * f64::from(TICKS_PER_QUARTER)).round().max(0.0) as u32
}

/// Channel 10 is reserved for percussion.
fn staff_channel(staff: usize) -> u8 {
    let channel = (staff % 15) as u8;
    if channel >= 9 {
        channel + 1
    } else {
        channel
    }
}

fn tempo_event(tick: u32, bpm: f64) -> MidiEvent {
    let uspq = (60_000_000.0 / bpm) as u32;
    MidiEvent {
        tick,
        order: 0,
        bytes: vec![
            0xFF,
            0x51,
            0x03,
            ((uspq >> 16) & 0xFF) as u8,
            ((uspq >> 8) & 0xFF) as u8,
            (uspq & 0xFF) as u8,
        ],
    }
}

fn build_smf(track: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(track.len() + 22);
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&TICKS_PER_QUARTER.to_be_bytes());

    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&(track.len() as u32).to_be_bytes());
    out.extend_from_slice(track);
    out
}

fn encode_track(events: &mut [MidiEvent], name: &str) -> Vec<u8> {
    let mut data = Vec::new();

    let name_bytes = name.as_bytes();
    data.extend_from_slice(&[0x00, 0xFF, 0x03]);
    write_vlq(&mut data, name_bytes.len() as u32);
    data.extend_from_slice(name_bytes);

    events.sort_by_key(|event| (event.tick, event.order));
    let mut last_tick = 0;
    for event in events.iter() {
        write_vlq(&mut data, event.tick.saturating_sub(last_tick));
        data.extend_from_slice(&event.bytes);
        last_tick = event.tick;
    }

    data.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
    data
}

fn write_vlq(out: &mut Vec<u8>, mut value: u32) {
    let mut buf = [0u8; 5];
    let mut len = 0;
    loop {
        buf[len] = (value & 0x7F) as u8;
        if len > 0 {
            buf[len] |= 0x80;
        }
        len += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    out.extend(buf[..len].iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlq_encoding() {
        let mut buf = Vec::new();
        write_vlq(&mut buf, 0);
        assert_eq!(buf, [0x00]);

        buf.clear();
        write_vlq(&mut buf, 127);
        assert_eq!(buf, [0x7F]);

        buf.clear();
        write_vlq(&mut buf, 480);
        assert_eq!(buf, [0x83, 0x60]);

        buf.clear();
        write_vlq(&mut buf, 0x0FFF_FFFF);
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn score_exports_type_zero_file() {
        let score = Score::parse(
            r#"<mei><section><measure xml:id="m1"><staff n="1"><layer>
              <note xml:id="a" pname="a" oct="4" dur="4"/>
              <note xml:id="b" pname="a" oct="4" dur="4"/>
            </layer></staff></measure></section></mei>"#,
        )
        .unwrap();
        let smf = encode_score(&score);

        assert_eq!(&smf[0..4], b"MThd");
        assert_eq!(&smf[8..10], &0u16.to_be_bytes());
        assert_eq!(&smf[10..12], &1u16.to_be_bytes());
        assert_eq!(&smf[12..14], &TICKS_PER_QUARTER.to_be_bytes());
        assert_eq!(&smf[14..18], b"MTrk");
        // 120 bpm tempo meta
        assert!(smf.windows(6).any(|w| w == [0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]));
        // the first note's off precedes the retriggered on at tick 480
        assert!(smf.windows(7).any(|w| w == [0x83, 0x60, 0x80, 69, 0, 0x00, 0x90]));
        assert!(smf.ends_with(&[0x00, 0xFF, 0x2F, 0x00]));
    }
}
