use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse MIDI file: {0}")]
    Midi(#[from] midly::Error),

    #[error("SMPTE timecode timing is not supported")]
    UnsupportedTiming,

    #[error("song has a resolution of zero ticks per beat")]
    ZeroTicksPerBeat,

    #[error("song has no time signature")]
    MissingTimeSignature,

    #[error("song has no tempo")]
    MissingTempo,

    #[error("invalid measure range {start}..={end}, song has {last} measures")]
    InvalidMeasureRange { start: u32, end: u32, last: u32 },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),

    #[error("failed to write config: {0}")]
    ConfigWrite(#[from] ron::Error),

    #[error("MIDI output: {0}")]
    Output(String),
}
