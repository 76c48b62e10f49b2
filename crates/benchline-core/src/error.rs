use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Identity errors
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid element selector: {0}")]
    InvalidElement(String),

    // Phase errors
    #[error("Invalid phase '{phase}': {reason}")]
    InvalidPhase { phase: String, reason: String },

    #[error("Invalid limits for phase '{phase}': lower {lower} > upper {upper}")]
    InvalidLimits { phase: String, lower: f64, upper: f64 },

    // Serial configuration errors
    #[error("Invalid serial setting: {0}")]
    InvalidSerialSetting(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
