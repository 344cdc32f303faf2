use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage as MidlyMessage, Smf, Timing, TrackEventKind};

use super::{Adjustment, MessageKind, MidiMessage, Note};
use crate::error::{Error, Result};
use crate::timing::{Tempo, Tick, TimeSignature};

/// A decoded song: every track merged into one tick-ordered stream.
#[derive(Debug, Clone)]
pub struct MidiFile {
    ticks_per_beat: u16,
    messages: Vec<MidiMessage>,
}

impl MidiFile {
    /// Messages are stably sorted by tick.
    pub fn new(ticks_per_beat: u16, mut messages: Vec<MidiMessage>) -> Self {
        messages.sort_by_key(|m| m.ticks());
        Self {
            ticks_per_beat,
            messages,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(t) => t.as_int(),
            Timing::Timecode(..) => return Err(Error::UnsupportedTiming),
        };
        if ticks_per_beat == 0 {
            return Err(Error::ZeroTicksPerBeat);
        }

        let mut messages = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0i64;
            for event in track {
                tick += event.delta.as_int() as i64;
                if let Some(kind) = decode(event.kind) {
                    messages.push(MidiMessage::new(Tick(tick), kind));
                }
            }
        }

        Ok(Self::new(ticks_per_beat, messages))
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn messages(&self) -> &[MidiMessage] {
        &self.messages
    }
}

fn decode(kind: TrackEventKind<'_>) -> Option<MessageKind> {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            Some(decode_channel(channel.as_int() + 1, message))
        }
        TrackEventKind::Meta(MetaMessage::Tempo(micros)) => {
            Some(MessageKind::Tempo(Tempo::from_micros_per_beat(micros.as_int())))
        }
        TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator, _, _)) => {
            Some(MessageKind::TimeSignature(TimeSignature::new(
                numerator as u32,
                1u32 << denominator.min(31),
            )))
        }
        TrackEventKind::Meta(MetaMessage::EndOfTrack) => None,
        TrackEventKind::Meta(_) => Some(MessageKind::Other { bytes: None }),
        TrackEventKind::SysEx(data) => {
            let mut bytes = Vec::with_capacity(data.len() + 1);
            bytes.push(0xF0);
            bytes.extend_from_slice(data);
            Some(MessageKind::Other { bytes: Some(bytes) })
        }
        TrackEventKind::Escape(_) => None,
    }
}

fn decode_channel(channel: u8, message: MidlyMessage) -> MessageKind {
    let status = channel - 1;
    match message {
        MidlyMessage::NoteOn { key, vel } => {
            MessageKind::Note(Note::on(channel, key.as_int(), vel.as_int()))
        }
        MidlyMessage::NoteOff { key, vel } => MessageKind::Note(Note {
            velocity: vel.as_int(),
            ..Note::off(channel, key.as_int())
        }),
        MidlyMessage::ProgramChange { program } => {
            MessageKind::Adjustment(Adjustment::program(channel, program.as_int()))
        }
        MidlyMessage::Controller { controller, value } => MessageKind::Adjustment(
            Adjustment::controller(channel, controller.as_int(), value.as_int()),
        ),
        MidlyMessage::PitchBend { bend } => {
            MessageKind::Adjustment(Adjustment::pitch_wheel(channel, bend.0.as_int()))
        }
        MidlyMessage::Aftertouch { key, vel } => MessageKind::Other {
            bytes: Some(vec![0xA0 | status, key.as_int(), vel.as_int()]),
        },
        MidlyMessage::ChannelAftertouch { vel } => MessageKind::Other {
            bytes: Some(vec![0xD0 | status, vel.as_int()]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u4, u7, u14, u15, u24, u28};
    use midly::{Format, Header, PitchBend, TrackEvent};

    fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn channel(channel: u8, message: MidlyMessage) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        }
    }

    fn write(smf: &Smf) -> Vec<u8> {
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn decodes_and_merges_tracks() {
        let header = Header::new(Format::Parallel, Timing::Metrical(u15::new(480)));
        let mut smf = Smf::new(header);
        smf.tracks.push(vec![
            event(0, TrackEventKind::Meta(MetaMessage::TimeSignature(3, 2, 24, 8))),
            event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
            event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);
        smf.tracks.push(vec![
            event(
                0,
                channel(0, MidlyMessage::ProgramChange {
                    program: u7::new(0),
                }),
            ),
            event(
                0,
                channel(0, MidlyMessage::PitchBend {
                    bend: PitchBend(u14::new(8027)),
                }),
            ),
            event(
                240,
                channel(0, MidlyMessage::NoteOn {
                    key: u7::new(60),
                    vel: u7::new(90),
                }),
            ),
            event(
                240,
                channel(0, MidlyMessage::NoteOn {
                    key: u7::new(60),
                    vel: u7::new(0),
                }),
            ),
            event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);

        let file = MidiFile::from_bytes(&write(&smf)).unwrap();
        assert_eq!(file.ticks_per_beat(), 480);

        let kinds: Vec<(i64, MessageKind)> = file
            .messages()
            .iter()
            .map(|m| (m.ticks().0, m.kind().clone()))
            .collect();

        assert_eq!(
            kinds,
            vec![
                (0, MessageKind::TimeSignature(TimeSignature::new(3, 4))),
                (0, MessageKind::Tempo(Tempo::new(120.0))),
                (0, MessageKind::Adjustment(Adjustment::program(1, 0))),
                (0, MessageKind::Adjustment(Adjustment::pitch_wheel(1, 8027))),
                (240, MessageKind::Note(Note::on(1, 60, 90))),
                (480, MessageKind::Note(Note::on(1, 60, 0))),
            ]
        );
    }

    #[test]
    fn rejects_timecode_timing() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Timecode(midly::Fps::Fps25, 40),
        ));
        smf.tracks.push(vec![event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack))]);

        let result = MidiFile::from_bytes(&write(&smf));
        assert!(matches!(result, Err(Error::UnsupportedTiming)));
    }

    #[test]
    fn rejects_zero_resolution() {
        let header = Header::new(Format::SingleTrack, Timing::Metrical(u15::new(0)));
        let mut smf = Smf::new(header);
        smf.tracks.push(vec![
            event(0, TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8))),
            event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
            event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);

        let result = MidiFile::from_bytes(&write(&smf));
        assert!(matches!(result, Err(Error::ZeroTicksPerBeat)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            MidiFile::from_bytes(b"not a midi file"),
            Err(Error::Midi(_))
        ));
    }

    #[test]
    fn new_sorts_stably_by_tick() {
        let file = MidiFile::new(
            96,
            vec![
                MidiMessage::note(Tick(10), Note::on(1, 60, 100)),
                MidiMessage::note(Tick(0), Note::on(2, 61, 100)),
                MidiMessage::note(Tick(10), Note::on(3, 62, 100)),
            ],
        );
        let channels: Vec<u8> = file
            .messages()
            .iter()
            .filter_map(|m| m.as_note())
            .map(|n| n.channel)
            .collect();
        assert_eq!(channels, vec![2, 1, 3]);
    }
}
