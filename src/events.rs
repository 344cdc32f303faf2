use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::midi::{MidiMessage, Note, PERCUSSION_CHANNEL};
use crate::timing::{Tempo, Tick, TimeSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    One,
    Quarter,
    Eight,
}

impl ClickType {
    /// Classifies a 1-based eighth position within a measure.
    pub fn of_eighth(eighth: u32) -> Self {
        if eighth == 1 {
            ClickType::One
        } else if eighth % 2 == 1 {
            ClickType::Quarter
        } else {
            ClickType::Eight
        }
    }

    fn key(self) -> u8 {
        match self {
            ClickType::One => 31,
            ClickType::Quarter => 77,
            ClickType::Eight => 75,
        }
    }

    pub fn note(self) -> Note {
        Note::on(PERCUSSION_CHANNEL, self.key(), 100)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Message(MidiMessage),
    Click { ticks: Tick, click: ClickType },
}

impl EngineEvent {
    pub fn ticks(&self) -> Tick {
        match self {
            EngineEvent::Message(message) => message.ticks(),
            EngineEvent::Click { ticks, .. } => *ticks,
        }
    }

    /// Mixer track of a sounding event, `None` for anything that is not a note.
    pub fn track(&self) -> Option<EngineTrack> {
        match self {
            EngineEvent::Message(message) => {
                message.as_note().map(|note| EngineTrack::Midi(note.channel))
            }
            EngineEvent::Click { .. } => Some(EngineTrack::Click),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineTrack {
    Midi(u8),
    Click,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Play { playing: bool },
    Measure {
        measure: u32,
        time_signature: TimeSignature,
    },
    Tempo { tempo: Tempo, adjusted: Tempo },
}

/// Broadcasts playback events to every subscriber over its own channel.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<PlaybackEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Subscribers whose receiver was dropped are pruned here.
    pub fn publish(&self, event: PlaybackEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
