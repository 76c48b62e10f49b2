//! Errors raised while interpreting instrument responses.

pub type Result<T> = std::result::Result<T, ResponseError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseError {
    /// The instrument answered with an empty line.
    #[error("Empty response")]
    Empty,

    /// The first field is neither a number nor a no-data token.
    #[error("Not a numeric response: {text:?}")]
    NotNumeric { text: String },

    /// A status register query returned something other than an integer.
    #[error("Malformed register value: {text:?}")]
    MalformedRegister { text: String },

    /// `*IDN?` returned fewer than four fields.
    #[error("Malformed identity response: {text:?}")]
    MalformedIdentity { text: String },

    /// A line grew past the maximum without a terminator.
    #[error("Response line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

impl ResponseError {
    pub fn not_numeric(text: impl Into<String>) -> Self {
        Self::NotNumeric { text: text.into() }
    }

    pub fn malformed_register(text: impl Into<String>) -> Self {
        Self::MalformedRegister { text: text.into() }
    }

    pub fn malformed_identity(text: impl Into<String>) -> Self {
        Self::MalformedIdentity { text: text.into() }
    }
}
