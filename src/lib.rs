pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod mixer;
pub mod song;
pub mod timing;
pub mod trace;

pub use config::{ClickConfig, PlayerConfig};
pub use engine::{PlaybackEngine, PlayerControl};
pub use error::{Error, Result};
pub use events::{ClickType, EngineEvent, EngineTrack, PlaybackEvent};
pub use mixer::{Mixer, MixerChannel};
pub use song::{Measure, SongStructure};
pub use timing::{Tempo, TempoModifier, Tick, TimeSignature};
