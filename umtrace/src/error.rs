//! Errors returned by the tracer's control operations.
//!
//! Anomalies detected inside the hooks themselves are not errors but [`Fault`](crate::Fault)s.

/// Error types for tracer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The process-wide tracer has not been initialized yet.
    NotInitialized,
    /// The process-wide tracer has already been initialized.
    AlreadyInitialized,
    /// A set-once callback has already been installed.
    AlreadyInstalled,
    /// `freeze` was called on an already frozen stack.
    AlreadyFrozen,
    /// `resume` was called while the stack was not frozen.
    NotFrozen,
    /// No checkpoint was recorded for this jump buffer.
    UnknownCheckpoint(usize),
    /// No free slot left in the hook exclusion list.
    ExclusionListFull,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "Tracer not initialized"),
            Self::AlreadyInitialized => write!(f, "Tracer already initialized"),
            Self::AlreadyInstalled => write!(f, "Callback already installed"),
            Self::AlreadyFrozen => write!(f, "Shadow stack already frozen"),
            Self::NotFrozen => write!(f, "Shadow stack not frozen"),
            Self::UnknownCheckpoint(id) => {
                write!(f, "No checkpoint recorded for jump buffer {:#x}", id)
            }
            Self::ExclusionListFull => write!(f, "Exclusion list full"),
        }
    }
}

impl core::error::Error for Error {}
