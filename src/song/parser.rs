use std::collections::BTreeMap;

use super::Measure;
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::midi::{AdjustmentType, MessageKind, MidiMessage};
use crate::timing::{Tempo, Tick, TimeSignature};

/// Every adjustment seen so far, per channel and adjustment type, in tick
/// order.
#[derive(Default)]
struct AdjustmentHistory(BTreeMap<u8, BTreeMap<AdjustmentType, Vec<MidiMessage>>>);

impl AdjustmentHistory {
    fn record(&mut self, message: &MidiMessage) {
        if let Some(adjustment) = message.as_adjustment() {
            self.0
                .entry(adjustment.channel())
                .or_default()
                .entry(adjustment.adjustment_type())
                .or_default()
                .push(message.clone());
        }
    }

    /// Latest adjustment of each type per channel at or before `tick`.
    fn latest_at(&self, tick: Tick) -> BTreeMap<u8, Vec<EngineEvent>> {
        self.0
            .iter()
            .filter_map(|(channel, by_type)| {
                let latest: Vec<EngineEvent> = by_type
                    .values()
                    .filter_map(|history| history.iter().rev().find(|m| m.ticks() <= tick))
                    .map(|m| EngineEvent::Message(m.clone()))
                    .collect();
                (!latest.is_empty()).then_some((*channel, latest))
            })
            .collect()
    }
}

struct OpenMeasure {
    start: Tick,
    time_signature: TimeSignature,
    tempo: Tempo,
    events: Vec<EngineEvent>,
}

impl OpenMeasure {
    fn new(start: Tick, time_signature: TimeSignature, tempo: Tempo) -> Self {
        Self {
            start,
            time_signature,
            tempo,
            events: Vec::new(),
        }
    }
}

/// Splits a tick-ordered message stream into measures.
pub(super) struct Parser {
    ticks_per_beat: u16,
    time_signature: TimeSignature,
    tempo: Tempo,
    history: AdjustmentHistory,
    open: OpenMeasure,
    measures: Vec<Measure>,
}

impl Parser {
    pub(super) fn parse(ticks_per_beat: u16, messages: &[MidiMessage]) -> Result<Vec<Measure>> {
        if ticks_per_beat == 0 {
            return Err(Error::ZeroTicksPerBeat);
        }
        let (start, time_signature) = messages
            .iter()
            .find_map(|m| match m.kind() {
                MessageKind::TimeSignature(ts) => Some((m.ticks(), *ts)),
                _ => None,
            })
            .ok_or(Error::MissingTimeSignature)?;
        let tempo = messages
            .iter()
            .find_map(|m| match m.kind() {
                MessageKind::Tempo(tempo) => Some(*tempo),
                _ => None,
            })
            .ok_or(Error::MissingTempo)?;

        let mut parser = Parser {
            ticks_per_beat,
            time_signature,
            tempo,
            history: AdjustmentHistory::default(),
            open: OpenMeasure::new(start, time_signature, tempo),
            measures: Vec::new(),
        };

        for message in messages {
            parser.push(message);
        }

        Ok(parser.finish())
    }

    fn measure_ticks(&self, time_signature: TimeSignature) -> Tick {
        time_signature.measure_ticks(self.ticks_per_beat).max(Tick(1))
    }

    fn within_open_measure(&self, ticks: Tick) -> bool {
        ticks - self.open.start < self.measure_ticks(self.open.time_signature)
    }

    fn push(&mut self, message: &MidiMessage) {
        // Close the current measure and any empty ones before this message.
        while !self.within_open_measure(message.ticks()) {
            self.close_open_measure();
        }

        let at_measure_start = message.ticks() <= self.open.start;
        match message.kind() {
            MessageKind::TimeSignature(ts) => {
                self.time_signature = *ts;
                if at_measure_start {
                    self.open.time_signature = *ts;
                }
            }
            MessageKind::Tempo(tempo) => {
                self.tempo = *tempo;
                if at_measure_start {
                    self.open.tempo = *tempo;
                }
            }
            _ => {}
        }

        self.open.events.push(EngineEvent::Message(message.clone()));
        self.history.record(message);
    }

    fn close_open_measure(&mut self) {
        let next_start = self.open.start + self.measure_ticks(self.open.time_signature);
        let next = OpenMeasure::new(next_start, self.time_signature, self.tempo);
        let closed = std::mem::replace(&mut self.open, next);
        let measure = self.seal(closed);
        self.measures.push(measure);
    }

    fn seal(&self, open: OpenMeasure) -> Measure {
        Measure {
            number: self.measures.len() as u32 + 1,
            start: open.start,
            length: self.measure_ticks(open.time_signature),
            time_signature: open.time_signature,
            initial_tempo: open.tempo,
            initial_adjustments: self.history.latest_at(open.start),
            events: open.events,
        }
    }

    fn finish(mut self) -> Vec<Measure> {
        let last = std::mem::replace(
            &mut self.open,
            OpenMeasure::new(Tick::ZERO, self.time_signature, self.tempo),
        );
        let measure = self.seal(last);
        self.measures.push(measure);
        self.measures
    }
}
