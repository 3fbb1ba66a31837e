//! `haven` - family presence and safety-status engine
//!
//! Members of a family report their safety status during an emergency. This
//! library keeps that picture honest when members go quiet: the escalation
//! engine marks silent members "Not Yet Responded" and then "Unknown", the
//! location service acquires and persists device positions, and the presence
//! synchronizer ties one signed-in user's family document to both.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod escalation;
pub mod family;
pub mod location;
pub mod logging;
pub mod presence;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::Config;
pub use error::{Error, Result};
pub use escalation::{EscalationEngine, EscalationOutcome, SkipReason};
pub use family::{Family, Member};
pub use location::{LocationError, LocationProvider, LocationService};
pub use logging::init_logging;
pub use presence::{PresenceSynchronizer, RosterMember};
pub use status::{SafetyStatus, StatusKind};
pub use store::{DocumentStore, MemoryStore, SqliteStore};
