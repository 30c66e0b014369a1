//! Error types for siphon-rl

use thiserror::Error;

/// Result type for siphon-rl operations
pub type Result<T> = std::result::Result<T, SiphonRLError>;

/// siphon-rl error types
#[derive(Debug, Error)]
pub enum SiphonRLError {
    /// Malformed or out-of-range agent action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Bad pipeline/stage/config parameters, rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A pipeline stage cannot process its input
    #[error("Pipeline stage '{stage}': {message}")]
    Pipeline { stage: String, message: String },

    /// Telemetry collaborator unresponsive within the step timeout
    #[error("Telemetry timeout: {0}")]
    TelemetryTimeout(String),

    /// API misuse, e.g. step() before reset()
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transport-level communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the game-side service
    #[error("Game error {code}: {message}")]
    Game { code: i32, message: String },
}

impl SiphonRLError {
    /// True for errors that abort the current step and leave the episode
    /// unrecoverable without a reset (transport, timeout, pipeline faults).
    /// `InvalidAction` and `InvalidState` are local caller errors and never
    /// poison the episode.
    pub fn poisons_episode(&self) -> bool {
        !matches!(
            self,
            SiphonRLError::InvalidAction(_)
                | SiphonRLError::InvalidState(_)
                | SiphonRLError::InvalidConfiguration(_)
        )
    }
}

impl From<serde_json::Error> for SiphonRLError {
    fn from(err: serde_json::Error) -> Self {
        SiphonRLError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SiphonRLError {
    fn from(err: std::io::Error) -> Self {
        SiphonRLError::Ipc(err.to_string())
    }
}

/// Wire error codes reported by the siphon service
pub mod error_codes {
    pub const INVALID_REQUEST: i32 = -32000;
    pub const UNKNOWN_ATTRIBUTE: i32 = -32001;
    pub const CAPTURE_FAILED: i32 = -32002;
    pub const INPUT_REJECTED: i32 = -32003;
    pub const SCENARIO_UNAVAILABLE: i32 = -32004;
}
