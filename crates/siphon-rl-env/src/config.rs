//! Environment configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siphon_rl_core::{ActionSpace, FrameSpec, PixelFormat, Result, SiphonRLError, attrs};

/// Attribute-name bindings for the HP fields the episode tracker reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthBindings {
    pub player_hp: String,
    pub player_max_hp: String,
    pub boss_hp: String,
    pub boss_max_hp: String,
}

impl Default for HealthBindings {
    fn default() -> Self {
        Self {
            player_hp: attrs::PLAYER_HP.to_string(),
            player_max_hp: attrs::PLAYER_MAX_HP.to_string(),
            boss_hp: attrs::BOSS_HP.to_string(),
            boss_max_hp: attrs::BOSS_MAX_HP.to_string(),
        }
    }
}

impl HealthBindings {
    fn validate(&self) -> Result<()> {
        for (field, name) in [
            ("player_hp", &self.player_hp),
            ("player_max_hp", &self.player_max_hp),
            ("boss_hp", &self.boss_hp),
            ("boss_max_hp", &self.boss_max_hp),
        ] {
            if name.is_empty() {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "health binding '{field}' must name an attribute"
                )));
            }
        }
        Ok(())
    }
}

/// HP refund switches. `player`/`boss` enable the reported-HP rewrite on
/// that dimension; `suppresses_termination` additionally skips the win/loss
/// check on refunded dimensions and is deliberately a separate switch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefundPolicy {
    pub player: bool,
    pub boss: bool,
    pub suppresses_termination: bool,
}

/// Inclusive normalization bounds for one attribute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AttributeRange {
    pub min: f64,
    pub max: f64,
}

impl AttributeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Frame size a resize stage targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResizeTarget {
    pub width: u32,
    pub height: u32,
}

/// Declarative form of the standard stage chain, applied in this order:
/// resize, grayscale, frame stack, attribute normalization. Hand-built
/// pipelines with custom stages bypass this and call the builder directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub resize: Option<ResizeTarget>,
    pub grayscale: bool,
    pub frame_stack: Option<u32>,
    pub normalize: BTreeMap<String, AttributeRange>,
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if let Some(target) = &self.resize {
            if target.width == 0 || target.height == 0 {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "resize target must be non-zero, got {}x{}",
                    target.width, target.height
                )));
            }
        }
        if self.frame_stack == Some(0) {
            return Err(SiphonRLError::InvalidConfiguration(
                "frame_stack depth must be at least 1".to_string(),
            ));
        }
        for (name, range) in &self.normalize {
            if range.min >= range.max {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "normalization range for '{}' has min {} >= max {}",
                    name, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}

/// Full environment configuration, consumed as plain data. Loadable from
/// JSON with every field optional; defaults target the stock siphon tap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvConfig {
    /// Action-space mode and its table/inputs
    pub action_space: ActionSpace,

    /// Hold inputs across steps until the agent drops them
    pub action_persistence: bool,

    /// Frames the collaborator advances between input and capture
    pub frame_skip: u32,

    /// Step-count limit; episodes truncate when reached
    pub max_steps: Option<u64>,

    /// Pause the game clock while the agent deliberates
    pub freeze_game: bool,

    /// Telemetry poll bound in milliseconds
    pub poll_timeout_ms: u64,

    /// Shape the tap captures at, before any pipeline stage
    pub source_frame: FrameSpec,

    /// Attributes copied into the observation as scalars (every polled
    /// attribute still reaches the info record)
    pub observed_attributes: Vec<String>,

    /// HP attribute bindings for damage accounting
    pub health: HealthBindings,

    /// HP refund switches
    pub refund: RefundPolicy,

    /// Standard stage chain
    pub pipeline: PipelineConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            action_space: ActionSpace::default_keyboard(),
            action_persistence: false,
            frame_skip: 0,
            max_steps: None,
            freeze_game: false,
            poll_timeout_ms: 5_000,
            source_frame: FrameSpec::new(1920, 1080, PixelFormat::Bgr8),
            observed_attributes: Vec::new(),
            health: HealthBindings::default(),
            refund: RefundPolicy::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EnvConfig {
    /// Parses a JSON config; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EnvConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Fails fast on parameters no environment could run with. Schema-level
    /// pipeline checks happen again at pipeline construction.
    pub fn validate(&self) -> Result<()> {
        self.action_space.validate()?;
        if self.poll_timeout_ms == 0 {
            return Err(SiphonRLError::InvalidConfiguration(
                "poll_timeout_ms must be positive".to_string(),
            ));
        }
        if self.source_frame.width == 0 || self.source_frame.height == 0 {
            return Err(SiphonRLError::InvalidConfiguration(format!(
                "source frame must be non-zero, got {}x{}",
                self.source_frame.width, self.source_frame.height
            )));
        }
        if self.max_steps == Some(0) {
            return Err(SiphonRLError::InvalidConfiguration(
                "max_steps must be at least 1 when set".to_string(),
            ));
        }
        self.health.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}
