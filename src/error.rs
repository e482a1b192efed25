use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Invalid rim ROI {0:?}: expected x1 < x2 and y1 < y2 inside the frame")]
    InvalidRoi([f32; 4]),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Detection stream has no video metadata header")]
    MissingHeader,
}

impl Error {
    pub(crate) fn config<S: ToString>(field: &'static str, reason: S) -> Self {
        Error::InvalidConfig {
            field,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
