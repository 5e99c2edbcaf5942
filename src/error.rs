use thiserror::Error;

/// All errors produced by harken.
#[derive(Debug, Error)]
pub enum HarkenError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "assembler reached an impossible state: \
         inference_count={inference_count}/{num_of_inferences}, \
         read_count={read_count}, audio_length={audio_length}"
    )]
    InternalConsistency {
        inference_count: usize,
        num_of_inferences: usize,
        read_count: usize,
        audio_length: usize,
    },

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("score vector length {got} does not match label count {expected}")]
    LabelMismatch { expected: usize, got: usize },

    #[error("audio file error: {0}")]
    AudioFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarkenError>;
