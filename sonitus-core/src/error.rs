use thiserror::Error;

/// All errors produced by sonitus-core.
#[derive(Debug, Error)]
pub enum SonitusError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("duplicate component id: {id}")]
    DuplicateId { id: String },

    #[error("detector `{detector}` references unknown microphone `{microphone}`")]
    UnknownMicrophone { detector: String, microphone: String },

    #[error("detector `{detector}` has no microphone to bind — none declared")]
    MissingMicrophone { detector: String },

    #[error(
        "detector `{detector}` omits its microphone reference but {count} microphones are declared"
    )]
    AmbiguousMicrophone { detector: String, count: usize },

    #[error("invalid fft size {size}: must be a power of two and at least {min}")]
    InvalidFftSize { size: usize, min: usize },

    #[error("invalid sound source `{name}`: {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("invalid detector `{detector}` config: {reason}")]
    InvalidDetector { detector: String, reason: String },

    #[error("detector `{detector}` has no microphone bound")]
    UnboundMicrophone { detector: String },

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("WAV decode error: {0}")]
    WavDecode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SonitusError>;
