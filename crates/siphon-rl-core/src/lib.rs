//! # siphon-rl-core
//!
//! Core data model for siphon-rl, the observation/action/episode pipeline
//! between a live game process and an RL agent loop.
//!
//! This crate provides the types shared by every layer:
//! - Frames, pixel formats, and shape contracts
//! - Structured observations and their schemas
//! - Telemetry snapshots and memory attributes
//! - Agent actions, action spaces, and input commands
//! - The reward strategy trait and its default implementation
//! - The error taxonomy

pub mod action;
pub mod error;
pub mod frame;
pub mod observation;
pub mod reward;
pub mod telemetry;

pub use action::{ActionBinding, ActionCommand, ActionSpace, AgentAction};
pub use error::{Result, SiphonRLError, error_codes};
pub use frame::{Frame, FrameSpec, PixelFormat};
pub use observation::{
    EpisodeSummary, FRAME_KEY, ObsSchema, ObsValue, Observation, StepInfo, StepResult, ValueSpec,
};
pub use reward::{RewardStrategy, ScoreDeltaReward};
pub use telemetry::{AttrValue, TelemetrySnapshot, attrs};
