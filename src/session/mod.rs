//! Recording session
//!
//! The state machine driving capture, composition and recording, plus the
//! elapsed-time counter shown while recording.

pub mod machine;
pub mod state;
pub mod timer;

pub use machine::RecordingSession;
pub use state::{Affordances, SessionEvent, SessionSnapshot, SessionState};
pub use timer::{format_elapsed, ElapsedTimer};
