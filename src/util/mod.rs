pub mod errors;
pub mod logging;

pub use errors::{Error, ParticipantError, Result};
