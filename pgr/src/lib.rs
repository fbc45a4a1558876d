use thiserror::Error;

mod cmd;
mod config;
mod harness;
mod initiator;
mod model;
mod reservation;
pub mod scenarios;
mod sim;

pub use cmd::*;
pub use config::*;
pub use harness::*;
pub use initiator::*;
pub use model::*;
pub use reservation::*;
pub use sim::*;

#[derive(Error, Debug)]
pub enum PgrError {
    #[error("Must run with effective uid 0 for device access.")]
    NotRoot,
    #[error("Required command '{0}' not found or not runnable.")]
    MissingTool(String),
    #[error("Cannot read INQUIRY data from '{0}'.")]
    NoSerial(String),
    #[error("Serial number mismatch: '{dev}' reports '{serial}', expected '{expect}'.")]
    SerialMismatch {
        dev: String,
        serial: String,
        expect: String,
    },
    #[error("Bad harness configuration: {0}.")]
    BadConfig(String),
    #[error("A fatal I/O error occured.")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),

    #[error("Command '{cmd}' failed with status {status}.")]
    CommandFailed { cmd: String, status: i32 },
    #[error("Unparseable response from '{cmd}': '{line}'.")]
    BadResponse { cmd: String, line: String },
    #[error("Unrecognized reservation type string '{0}'.")]
    UnknownTypeName(String),

    #[error("Key '{0}' is already registered.")]
    DuplicateKey(String),
    #[error("Nexus '{0}' is already registered under another key.")]
    NexusRegistered(String),
    #[error("No registrant holds key '{0}'.")]
    NoSuchRegistrant(String),
    #[error("Caller '{0}' is not a registrant.")]
    NotRegistered(String),
    #[error("Reservation conflict.")]
    ReservationConflict,
}

/// Exit status of one target operation. Protocol rejections come back as
/// nonzero statuses and are asserted on, not treated as harness errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PgrStatus(i32);

impl PgrStatus {
    /// Status the external tool reports for a transient device-busy
    /// condition. The only status any operation is ever retried on.
    pub const RECOVERABLE_BUSY: i32 = 6;

    pub fn new(code: i32) -> Self {
        PgrStatus(code)
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn good(&self) -> bool {
        self.0 == 0
    }

    pub fn recoverable_busy(&self) -> bool {
        self.0 == Self::RECOVERABLE_BUSY
    }
}

impl std::fmt::Display for PgrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(PgrStatus::new(0).good());
        assert!(!PgrStatus::new(0).recoverable_busy());
        assert!(PgrStatus::new(6).recoverable_busy());
        assert!(!PgrStatus::new(24).good());
        assert!(!PgrStatus::new(24).recoverable_busy());
    }
}
