mod scheduler;

pub(crate) use scheduler::{MidiPlayer, SharedState};

use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Absolute position in ticks from the start of the song.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub i64);

/// Longest wait a single tick delta can turn into.
const MAX_DELTA_SECONDS: f64 = 24.0 * 60.0 * 60.0;

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Wall-clock length of this many ticks at the given tempo. Negative
    /// lengths are zero and the result never exceeds a day.
    pub fn to_duration(self, ticks_per_beat: u16, tempo: Tempo) -> Duration {
        let beats_per_second = tempo.bpm().max(Tempo::MIN_BPM) / 60.0;
        let ticks_per_second = ticks_per_beat.max(1) as f64 * beats_per_second;
        let seconds = (self.0 as f64 / ticks_per_second).min(MAX_DELTA_SECONDS);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
    }
}

impl Add for Tick {
    type Output = Tick;

    fn add(self, other: Tick) -> Tick {
        Tick(self.0 + other.0)
    }
}

impl Sub for Tick {
    type Output = Tick;

    fn sub(self, other: Tick) -> Tick {
        Tick(self.0 - other.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Tempo(f64);

impl Tempo {
    pub const MIN_BPM: f64 = 0.1;

    pub fn new(bpm: f64) -> Self {
        Self(bpm)
    }

    /// Tempo meta messages carry microseconds per quarter note.
    pub fn from_micros_per_beat(micros: u32) -> Self {
        if micros == 0 {
            Self(Self::MIN_BPM)
        } else {
            Self(60_000_000.0 / micros as f64)
        }
    }

    pub fn bpm(self) -> f64 {
        self.0
    }
}

impl Mul<f64> for Tempo {
    type Output = Tempo;

    fn mul(self, multiplier: f64) -> Tempo {
        Tempo(self.0 * multiplier)
    }
}

impl Add<f64> for Tempo {
    type Output = Tempo;

    fn add(self, bpm: f64) -> Tempo {
        Tempo(self.0 + bpm)
    }
}

impl Sub<f64> for Tempo {
    type Output = Tempo;

    fn sub(self, bpm: f64) -> Tempo {
        Tempo(self.0 - bpm)
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} bpm", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u32,
    pub unit: u32,
}

impl TimeSignature {
    pub fn new(beats: u32, unit: u32) -> Self {
        Self { beats, unit }
    }

    pub fn measure_ticks(self, ticks_per_beat: u16) -> Tick {
        let beat_ticks = ticks_per_beat as i64 * self.beats as i64;
        Tick(beat_ticks * 4 / self.unit.max(1) as i64)
    }

    pub fn eighth_count(self) -> u32 {
        self.beats * 8 / self.unit.max(1)
    }

    /// Offset of the given eighth (1-based) from the start of the measure.
    pub fn eighth_offset(self, eighth: u32, ticks_per_beat: u16) -> Tick {
        Tick(ticks_per_beat as i64 * (eighth as i64 - 1) / 2)
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats, self.unit)
    }
}

/// Turns the song's authored tempo into the tempo actually played.
#[derive(Clone)]
pub struct TempoModifier(Arc<dyn Fn(Tempo) -> Tempo + Send + Sync>);

impl TempoModifier {
    pub const MIN_MULTIPLIER: f64 = 0.1;
    pub const MAX_MULTIPLIER: f64 = 3.0;

    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Tempo) -> Tempo + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|tempo| tempo)
    }

    pub fn multiplier(multiplier: f64) -> Self {
        let multiplier = multiplier.clamp(Self::MIN_MULTIPLIER, Self::MAX_MULTIPLIER);
        Self::new(move |tempo| tempo * multiplier)
    }

    pub fn constant(tempo: Tempo) -> Self {
        Self::new(move |_| tempo)
    }

    pub fn apply(&self, tempo: Tempo) -> Tempo {
        (self.0)(tempo)
    }
}

impl Default for TempoModifier {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for TempoModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TempoModifier")
    }
}
