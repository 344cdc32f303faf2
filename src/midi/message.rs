use crate::timing::{Tempo, Tick, TimeSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOff {
    On,
    Off,
}

/// A note message. Channels are numbered 1..=16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub on_off: OnOff,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
}

impl Note {
    pub fn on(channel: u8, key: u8, velocity: u8) -> Self {
        Self {
            on_off: OnOff::On,
            channel,
            key,
            velocity,
        }
    }

    pub fn off(channel: u8, key: u8) -> Self {
        Self {
            on_off: OnOff::Off,
            channel,
            key,
            velocity: 0,
        }
    }

    /// Note-on with a velocity above zero. Velocity 0 note-ons are used as
    /// note-offs by many files.
    pub fn is_sounding(&self) -> bool {
        self.on_off == OnOff::On && self.velocity > 0
    }
}

/// Channel state that persists until overridden and must be replayed when
/// jumping into the middle of a song.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    ProgramChange {
        channel: u8,
        program: u8,
    },
    Controller {
        channel: u8,
        controller: u8,
        value: u8,
    },
    /// Raw 14-bit value, 8192 is centered.
    PitchWheel {
        channel: u8,
        value: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AdjustmentType {
    Program,
    Controller(u8),
    PitchWheel,
}

impl Adjustment {
    pub fn program(channel: u8, program: u8) -> Self {
        Adjustment::ProgramChange { channel, program }
    }

    pub fn controller(channel: u8, controller: u8, value: u8) -> Self {
        Adjustment::Controller {
            channel,
            controller,
            value,
        }
    }

    pub fn pitch_wheel(channel: u8, value: u16) -> Self {
        Adjustment::PitchWheel { channel, value }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Adjustment::ProgramChange { channel, .. }
            | Adjustment::Controller { channel, .. }
            | Adjustment::PitchWheel { channel, .. } => channel,
        }
    }

    /// Adjustments of the same type on a channel override each other.
    pub fn adjustment_type(&self) -> AdjustmentType {
        match *self {
            Adjustment::ProgramChange { .. } => AdjustmentType::Program,
            Adjustment::Controller { controller, .. } => AdjustmentType::Controller(controller),
            Adjustment::PitchWheel { .. } => AdjustmentType::PitchWheel,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Note(Note),
    Tempo(Tempo),
    TimeSignature(TimeSignature),
    Adjustment(Adjustment),
    /// Anything else. Meta messages carry no bytes and are never sent.
    Other { bytes: Option<Vec<u8>> },
}

/// A decoded message stamped with its absolute tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiMessage {
    ticks: Tick,
    kind: MessageKind,
}

impl MidiMessage {
    pub fn new(ticks: Tick, kind: MessageKind) -> Self {
        Self { ticks, kind }
    }

    pub fn note(ticks: Tick, note: Note) -> Self {
        Self::new(ticks, MessageKind::Note(note))
    }

    pub fn tempo(ticks: Tick, tempo: Tempo) -> Self {
        Self::new(ticks, MessageKind::Tempo(tempo))
    }

    pub fn time_signature(ticks: Tick, time_signature: TimeSignature) -> Self {
        Self::new(ticks, MessageKind::TimeSignature(time_signature))
    }

    pub fn adjustment(ticks: Tick, adjustment: Adjustment) -> Self {
        Self::new(ticks, MessageKind::Adjustment(adjustment))
    }

    pub fn ticks(&self) -> Tick {
        self.ticks
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn as_note(&self) -> Option<Note> {
        match self.kind {
            MessageKind::Note(note) => Some(note),
            _ => None,
        }
    }

    pub fn as_adjustment(&self) -> Option<Adjustment> {
        match self.kind {
            MessageKind::Adjustment(adjustment) => Some(adjustment),
            _ => None,
        }
    }

    /// Wire bytes for an output port, `None` for meta messages.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.kind {
            MessageKind::Note(note) => {
                let status = match note.on_off {
                    OnOff::On => 0x90,
                    OnOff::Off => 0x80,
                };
                Some(vec![
                    status | channel_nibble(note.channel),
                    note.key & 0x7F,
                    note.velocity & 0x7F,
                ])
            }
            MessageKind::Adjustment(Adjustment::ProgramChange { channel, program }) => {
                Some(vec![0xC0 | channel_nibble(*channel), program & 0x7F])
            }
            MessageKind::Adjustment(Adjustment::Controller {
                channel,
                controller,
                value,
            }) => Some(vec![
                0xB0 | channel_nibble(*channel),
                controller & 0x7F,
                value & 0x7F,
            ]),
            MessageKind::Adjustment(Adjustment::PitchWheel { channel, value }) => Some(vec![
                0xE0 | channel_nibble(*channel),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ]),
            MessageKind::Tempo(_) | MessageKind::TimeSignature(_) => None,
            MessageKind::Other { bytes } => bytes.clone(),
        }
    }
}

fn channel_nibble(channel: u8) -> u8 {
    channel.saturating_sub(1) & 0x0F
}

/// Controller 120 (all sound off) for a 1-based channel.
pub fn all_sound_off(channel: u8) -> [u8; 3] {
    [0xB0 | channel_nibble(channel), 0x78, 0]
}
