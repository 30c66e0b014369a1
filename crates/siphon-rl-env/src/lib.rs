//! # siphon-rl-env
//!
//! The environment layer of siphon-rl: turns any [`GameInterface`] into an
//! episodic RL environment with Gym-style `reset`/`step` semantics.
//!
//! The moving parts, each usable on its own:
//! - [`ActionDispatcher`]: agent actions to input-state commands, with
//!   optional cross-step persistence
//! - [`ObservationPipeline`]: declared-IO stage chain over structured
//!   observations, validated at construction
//! - [`EpisodeTracker`]: damage accounting, HP refunds and the
//!   win/loss/timeout verdict
//! - [`SiphonEnv`]: sequences the above over a live game, committing each
//!   step atomically

pub mod config;
pub mod dispatch;
pub mod env;
pub mod interface;
pub mod pipeline;
pub mod stages;
pub mod tracker;

pub use config::{
    AttributeRange, EnvConfig, HealthBindings, PipelineConfig, RefundPolicy, ResizeTarget,
};
pub use dispatch::{ActionDispatcher, PendingDispatch};
pub use env::SiphonEnv;
pub use interface::GameInterface;
pub use pipeline::{ObservationPipeline, ObservationStage, PipelineBuilder};
pub use stages::{FrameStack, Grayscale, NormalizeMemoryAttributes, Resize};
pub use tracker::{EpisodeTracker, StepAccounting, Verdict};
