mod channel;

pub use channel::MixerChannel;

use std::collections::{BTreeMap, HashMap};

use crate::events::EngineTrack;
use crate::midi::{MidiMessage, Note};

/// Resolved per-track gain in 0.0..=1.0.
pub type Gains = HashMap<EngineTrack, f64>;

/// Gain for every track, full volume.
pub fn unity_gains() -> Gains {
    all_tracks().map(|track| (track, 1.0)).collect()
}

fn all_tracks() -> impl Iterator<Item = EngineTrack> {
    (1..=16).map(EngineTrack::Midi).chain(std::iter::once(EngineTrack::Click))
}

/// Volume, mute and solo state for the sixteen MIDI channels and the click.
#[derive(Debug, Clone)]
pub struct Mixer {
    channels: BTreeMap<EngineTrack, MixerChannel>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            channels: all_tracks()
                .map(|track| (track, MixerChannel::new(track)))
                .collect(),
        }
    }

    pub fn channel(&self, track: EngineTrack) -> MixerChannel {
        self.channels
            .get(&track)
            .copied()
            .unwrap_or_else(|| MixerChannel::new(track))
    }

    pub fn update_channel<F>(&mut self, track: EngineTrack, update: F) -> MixerChannel
    where
        F: FnOnce(MixerChannel) -> MixerChannel,
    {
        let channel = MixerChannel {
            track,
            ..update(self.channel(track))
        };
        self.channels.insert(track, channel);
        channel
    }

    /// Solo silences every channel that is not soloed; the loudest channel
    /// is normalized to 1.0 when any adjustment exceeds it.
    pub fn gains(&self) -> Gains {
        let maximum = self
            .channels
            .values()
            .map(|c| c.volume_adjustment)
            .fold(1.0, f64::max);
        let some_solo = self.channels.values().any(|c| c.solo);

        self.channels
            .values()
            .map(|c| {
                let gain = if c.muted || (some_solo && !c.solo) {
                    0.0
                } else {
                    c.volume_adjustment.max(0.0) / maximum
                };
                (c.track, gain)
            })
            .collect()
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

/// Scales the velocity of a sounding note on `track`. Returns `None` when
/// the message should go out untouched: anything but a note-on with a
/// positive velocity, since velocity 0 note-ons act as note-offs.
pub fn apply_gain(
    message: &MidiMessage,
    track: EngineTrack,
    gains: &Gains,
) -> Option<MidiMessage> {
    let note = message.as_note().filter(Note::is_sounding)?;
    let gain = gains.get(&track).copied().unwrap_or(1.0);
    let velocity = (note.velocity as f64 * gain).round().clamp(0.0, 127.0) as u8;
    Some(MidiMessage::note(message.ticks(), Note { velocity, ..note }))
}
