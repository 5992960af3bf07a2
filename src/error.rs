use std::fmt;

/// Which half of the join a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Probe,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Probe => write!(f, "probe"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JoinError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{phase} worker for partition {partition} panicked")]
    WorkerPanicked { phase: Phase, partition: usize },

    #[error("deadline exceeded during {phase} phase")]
    DeadlineExceeded { phase: Phase },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn {phase} worker for partition {partition}: {reason}")]
    SpawnFailed {
        phase: Phase,
        partition: usize,
        reason: String,
    },
}

pub type Result<T, E = JoinError> = std::result::Result<T, E>;

macro_rules! invalid_config {
    ($($arg:tt)*) => {
        crate::error::JoinError::InvalidConfig(std::format!($($arg)*))
    };
}
pub(crate) use invalid_config;
