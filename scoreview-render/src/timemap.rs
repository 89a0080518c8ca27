use crate::score::Score;

#[derive(Debug, Clone, PartialEq)]
pub struct TimedNote {
    pub id: String,
    pub measure: usize,
    pub start_ms: f64,
    pub end_ms: f64,
}

/// Wall-clock position of every note, following the per-measure tempo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timemap {
    notes: Vec<TimedNote>,
    measure_starts: Vec<f64>,
    total_ms: f64,
}

impl Timemap {
    pub fn build(score: &Score) -> Self {
        let mut notes = Vec::new();
        let mut measure_starts = Vec::with_capacity(score.measures.len());
        let mut cursor = 0.0;

        for (index, measure) in score.measures.iter().enumerate() {
            let ms_per_quarter = 60_000.0 / measure.bpm;
            measure_starts.push(cursor);
            for note in &measure.notes {
                let start_ms = cursor + note.onset * ms_per_quarter;
                notes.push(TimedNote {
                    id: note.id.clone(),
                    measure: index,
                    start_ms,
                    end_ms: start_ms + note.duration * ms_per_quarter,
                });
            }
            cursor += measure.length * ms_per_quarter;
        }
        notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));

        Self {
            notes,
            measure_starts,
            total_ms: cursor,
        }
    }

    pub fn total_ms(&self) -> f64 {
        self.total_ms
    }

    pub fn measure_start(&self, measure: usize) -> Option<f64> {
        self.measure_starts.get(measure).copied()
    }

    /// Notes sounding at `millis`, earliest onset first.
    pub fn sounding_at(&self, millis: u64) -> impl Iterator<Item = &TimedNote> {
        let at = millis as f64;
        self.notes
            .iter()
            .take_while(move |note| note.start_ms <= at)
            .filter(move |note| at < note.end_ms)
    }
}
