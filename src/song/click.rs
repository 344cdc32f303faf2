use super::Measure;
use crate::events::{ClickType, EngineEvent};

/// Metronome clicks on every eighth of the measure.
pub(super) fn measure_clicks(measure: &Measure, ticks_per_beat: u16) -> Vec<EngineEvent> {
    let time_signature = measure.time_signature;
    (1..=time_signature.eighth_count())
        .map(|eighth| EngineEvent::Click {
            ticks: measure.start + time_signature.eighth_offset(eighth, ticks_per_beat),
            click: ClickType::of_eighth(eighth),
        })
        .collect()
}

pub(super) fn inject_click(measures: Vec<Measure>, ticks_per_beat: u16) -> Vec<Measure> {
    measures
        .into_iter()
        .map(|mut measure| {
            let mut events = measure_clicks(&measure, ticks_per_beat);
            events.append(&mut measure.events);
            // Stable, so clicks stay ahead of messages on the same tick.
            events.sort_by_key(|e| e.ticks());
            measure.events = events;
            measure
        })
        .collect()
}
