pub mod constants;
pub mod error;
pub mod phase;
pub mod result;
pub mod types;

pub use error::{Error, Result};
pub use phase::{CollectionMethod, PhaseSpec};
pub use result::{PhaseResult, Sample, Session, SessionDraft, SessionId, SessionOutcome};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
