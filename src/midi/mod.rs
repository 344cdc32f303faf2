mod file;
mod gm;
mod message;
mod port;

pub use file::MidiFile;
pub use gm::instrument_name;
pub use message::{Adjustment, AdjustmentType, MessageKind, MidiMessage, Note, OnOff, all_sound_off};
pub use port::{MidiPort, MidirPort, OutputPort};

#[cfg(test)]
pub(crate) use port::testing;

/// Channel used by General MIDI for percussion.
pub const PERCUSSION_CHANNEL: u8 = 10;
