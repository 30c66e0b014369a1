//! Structured observations and the per-step records built from them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::frame::{Frame, FrameSpec};
use crate::telemetry::AttrValue;

/// Key every base observation carries for the captured image
pub const FRAME_KEY: &str = "frame";

/// One typed value inside a structured observation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ObsValue {
    /// Single image
    Frame(Frame),
    /// Temporally stacked images, oldest first
    Frames(Vec<Frame>),
    /// Numeric memory attribute
    Scalar(f64),
}

impl ObsValue {
    /// Shape contract of this value. `None` for malformed stacks (empty, or
    /// mixed shapes within one group).
    pub fn spec(&self) -> Option<ValueSpec> {
        match self {
            ObsValue::Frame(frame) => Some(ValueSpec::Frame(frame.spec())),
            ObsValue::Frames(frames) => {
                let first = frames.first()?.spec();
                if frames.iter().any(|f| f.spec() != first) {
                    return None;
                }
                Some(ValueSpec::Frames {
                    depth: frames.len() as u32,
                    frame: first,
                })
            }
            ObsValue::Scalar(_) => Some(ValueSpec::Scalar),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ObsValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

/// Declared type/shape of one observation key, used for construction-time
/// pipeline validation and runtime input checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValueSpec {
    Frame(FrameSpec),
    Frames { depth: u32, frame: FrameSpec },
    Scalar,
}

/// Per-key shape contract for a whole observation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObsSchema {
    entries: BTreeMap<String, ValueSpec>,
}

impl ObsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, spec: ValueSpec) -> Self {
        self.entries.insert(key.into(), spec);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: ValueSpec) {
        self.entries.insert(key.into(), spec);
    }

    pub fn remove(&mut self, key: &str) -> Option<ValueSpec> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&ValueSpec> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValueSpec)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Structured observation: named keys mapped to typed values. Stages must
/// pass every key through unchanged or rewrite a key they declared up front;
/// the pipeline harness enforces that, not the stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    values: BTreeMap<String, ObsValue>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ObsValue) {
        self.values.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: ObsValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ObsValue> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ObsValue> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn scalar(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(ObsValue::as_scalar)
    }

    pub fn frame(&self, key: &str) -> Option<&Frame> {
        match self.values.get(key) {
            Some(ObsValue::Frame(frame)) => Some(frame),
            _ => None,
        }
    }

    pub fn frames(&self, key: &str) -> Option<&[Frame]> {
        match self.values.get(key) {
            Some(ObsValue::Frames(frames)) => Some(frames),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ObsValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Episode totals exposed on the terminal step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpisodeSummary {
    /// Steps taken this episode
    pub length: u64,

    /// Sum of all step rewards
    pub total_reward: f64,

    /// True when the episode ended with the boss defeated
    pub victory: bool,

    /// Cumulative normalized damage dealt to the boss
    pub boss_damage_dealt_normalized: f64,

    /// Cumulative normalized damage taken by the player
    pub player_damage_taken_normalized: f64,
}

/// Per-step bookkeeping handed to reward strategies and callers alongside
/// the observation. Damage fields always hold true (unrefunded) values; HP
/// fields hold what is reported downstream, which differs under refund.
/// Additions are strictly additive; consumers must tolerate unknown fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepInfo {
    /// Step counter value after this step (0 for the reset record)
    pub step: u64,

    /// Reported player HP
    pub player_hp: f64,

    /// Player max HP
    pub player_max_hp: f64,

    /// Reported player HP divided by max HP
    pub player_hp_normalized: f64,

    /// Reported boss HP
    pub boss_hp: f64,

    /// Boss max HP
    pub boss_max_hp: f64,

    /// Reported boss HP divided by max HP
    pub boss_hp_normalized: f64,

    /// True damage taken by the player this step
    pub player_damage_taken: f64,

    /// True damage taken divided by player max HP
    pub player_damage_taken_normalized: f64,

    /// True damage dealt to the boss this step
    pub boss_damage_dealt: f64,

    /// True damage dealt divided by boss max HP
    pub boss_damage_dealt_normalized: f64,

    /// Cumulative HP refunded to the player this episode
    #[serde(default)]
    pub player_hp_refunded: f64,

    /// Cumulative HP refunded to the boss this episode
    #[serde(default)]
    pub boss_hp_refunded: f64,

    /// Reported attribute values for this step
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,

    /// Episode totals, present only on the terminal step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeSummary>,

    /// Values contributed by optional stages, keyed collision-free
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StepInfo {
    /// Reported numeric attribute, if the tap exported it
    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).map(AttrValue::as_f64)
    }
}

/// Everything one environment step returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Transformed observation
    pub observation: Observation,

    /// Scalar reward signal
    pub reward: f64,

    /// Episode ended on a game-state outcome (win/loss)
    pub terminated: bool,

    /// Episode ended on the step-count limit
    pub truncated: bool,

    /// Per-step bookkeeping
    pub info: StepInfo,
}
