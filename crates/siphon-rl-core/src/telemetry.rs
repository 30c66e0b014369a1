//! Telemetry snapshots captured from the game tap

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Raw attribute value read from game memory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            AttrValue::Int(v) => *v as f64,
            AttrValue::Float(v) => *v,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

/// One capture from the game: a frame plus the named memory attributes the
/// tap was asked to read. Immutable once built; superseded every step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySnapshot {
    pub frame: Frame,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl TelemetrySnapshot {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            attributes: BTreeMap::new(),
        }
    }

    /// Numeric view of one attribute, if present
    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).map(AttrValue::as_f64)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Attribute names exported by the stock siphon tap. Configuration binds
/// against these by default; nothing in the pipeline hardcodes them.
pub mod attrs {
    pub const PLAYER_HP: &str = "HeroHp";
    pub const PLAYER_MAX_HP: &str = "HeroMaxHp";
    pub const BOSS_HP: &str = "NpcHp";
    pub const BOSS_MAX_HP: &str = "NpcMaxHp";
    pub const PLAYER_ANIM: &str = "HeroAnimId";
    pub const BOSS_ANIM: &str = "NpcAnimId";
    pub const TARGET_DISTANCE: &str = "TargetDistance";
}
