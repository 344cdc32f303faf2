use crate::events::EngineTrack;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerChannel {
    pub track: EngineTrack,
    /// 1.0 is the level authored in the file.
    pub volume_adjustment: f64,
    pub muted: bool,
    pub solo: bool,
}

impl MixerChannel {
    pub fn new(track: EngineTrack) -> Self {
        Self {
            track,
            volume_adjustment: 1.0,
            muted: false,
            solo: false,
        }
    }

    pub fn with_volume(self, volume_adjustment: f64) -> Self {
        Self {
            volume_adjustment: volume_adjustment.max(0.0),
            ..self
        }
    }

    pub fn with_muted(self, muted: bool) -> Self {
        Self { muted, ..self }
    }

    pub fn with_solo(self, solo: bool) -> Self {
        Self { solo, ..self }
    }
}
