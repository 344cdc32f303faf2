mod chunk;
mod click;
mod parser;

pub use chunk::Chunks;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::events::{EngineEvent, EngineTrack};
use crate::midi::{Adjustment, MidiFile, instrument_name};
use crate::timing::{Tempo, Tick, TimeSignature};
use parser::Parser;

/// One bar of the song.
///
/// `initial_adjustments` holds, per channel, the latest program, controller
/// and pitch wheel state at or before `start`, so playback can begin at this
/// measure with the right instrument setup.
#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub number: u32,
    pub start: Tick,
    pub length: Tick,
    pub time_signature: TimeSignature,
    pub initial_tempo: Tempo,
    pub initial_adjustments: BTreeMap<u8, Vec<EngineEvent>>,
    pub events: Vec<EngineEvent>,
}

impl Measure {
    pub fn end(&self) -> Tick {
        self.start + self.length
    }

    /// Events grouped by identical tick. With `include_adjustments` the
    /// initial adjustments lead the first chunk, stamped at `start`.
    pub fn chunked(&self, include_adjustments: bool) -> Chunks<'_> {
        let adjustments = include_adjustments.then_some(&self.initial_adjustments);
        Chunks::new(self.start, adjustments, &self.events)
    }
}

/// (program number counted from 1, General MIDI name)
pub type Instrument = (u8, &'static str);

#[derive(Debug, Clone)]
pub struct SongStructure {
    ticks_per_beat: u16,
    measures: Vec<Measure>,
    tracks: BTreeSet<EngineTrack>,
    track_instruments: BTreeMap<EngineTrack, Vec<Instrument>>,
}

impl SongStructure {
    pub fn of(file: &MidiFile) -> Result<Self> {
        let measures = Parser::parse(file.ticks_per_beat(), file.messages())?;
        Ok(Self::from_measures(file.ticks_per_beat(), measures))
    }

    pub fn with_click(file: &MidiFile) -> Result<Self> {
        let measures = Parser::parse(file.ticks_per_beat(), file.messages())?;
        let measures = click::inject_click(measures, file.ticks_per_beat());
        Ok(Self::from_measures(file.ticks_per_beat(), measures))
    }

    fn from_measures(ticks_per_beat: u16, measures: Vec<Measure>) -> Self {
        let tracks = measures
            .iter()
            .flat_map(|m| m.events.iter())
            .filter_map(EngineEvent::track)
            .collect();

        let mut track_instruments: BTreeMap<EngineTrack, Vec<Instrument>> = BTreeMap::new();
        for event in measures.iter().flat_map(|m| m.events.iter()) {
            if let EngineEvent::Message(message) = event {
                if let Some(Adjustment::ProgramChange { channel, program }) =
                    message.as_adjustment()
                {
                    track_instruments
                        .entry(EngineTrack::Midi(channel))
                        .or_default()
                        .push((program + 1, instrument_name(program)));
                }
            }
        }
        for instruments in track_instruments.values_mut() {
            instruments.sort_by_key(|(program, _)| *program);
            instruments.dedup();
        }

        Self {
            ticks_per_beat,
            measures,
            tracks,
            track_instruments,
        }
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn measure(&self, number: u32) -> Option<&Measure> {
        number
            .checked_sub(1)
            .and_then(|index| self.measures.get(index as usize))
    }

    pub fn last_measure(&self) -> u32 {
        self.measures.last().map_or(0, |m| m.number)
    }

    pub fn tracks(&self) -> &BTreeSet<EngineTrack> {
        &self.tracks
    }

    pub fn track_instruments(&self) -> &BTreeMap<EngineTrack, Vec<Instrument>> {
        &self.track_instruments
    }
}
