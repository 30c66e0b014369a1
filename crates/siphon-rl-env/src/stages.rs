//! Built-in observation stages

use std::collections::{BTreeMap, VecDeque};

use siphon_rl_core::{FRAME_KEY, Frame, ObsValue, Result, SiphonRLError, ValueSpec};

use crate::config::AttributeRange;
use crate::pipeline::ObservationStage;

fn stage_err(stage: &str, message: impl Into<String>) -> SiphonRLError {
    SiphonRLError::Pipeline {
        stage: stage.to_string(),
        message: message.into(),
    }
}

/// Splits a claimed value into the group of frames it carries
fn into_group(stage: &str, key: &str, value: ObsValue) -> Result<Vec<Frame>> {
    match value {
        ObsValue::Frame(frame) => Ok(vec![frame]),
        ObsValue::Frames(frames) if !frames.is_empty() => Ok(frames),
        _ => Err(stage_err(stage, format!("key '{key}' does not hold frames"))),
    }
}

/// Repackages a group: single frames stay single, stacks stay stacks
fn from_group(was_stacked: bool, mut group: Vec<Frame>) -> ObsValue {
    if was_stacked || group.len() != 1 {
        ObsValue::Frames(group)
    } else {
        ObsValue::Frame(group.remove(0))
    }
}

/// Ring buffer over the last N frames of one key, emitted oldest→newest
/// along a new leading axis. The buffer seeds itself by replicating the
/// first frame after every reset, so the output depth is constant from the
/// very first step of an episode. An already-stacked input is treated as
/// one buffer entry and the output depth multiplies.
pub struct FrameStack {
    key: String,
    depth: u32,
    buffer: VecDeque<Vec<Frame>>,
}

impl FrameStack {
    pub fn new(depth: u32) -> Result<Self> {
        Self::with_key(FRAME_KEY, depth)
    }

    pub fn with_key(key: impl Into<String>, depth: u32) -> Result<Self> {
        if depth == 0 {
            return Err(SiphonRLError::InvalidConfiguration(
                "frame stack depth must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            key: key.into(),
            depth,
            buffer: VecDeque::new(),
        })
    }
}

impl ObservationStage for FrameStack {
    fn name(&self) -> &str {
        "frame_stack"
    }

    fn reads(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn plan(&self, claimed: &BTreeMap<String, ValueSpec>) -> Result<BTreeMap<String, ValueSpec>> {
        let spec = match claimed.get(&self.key) {
            Some(ValueSpec::Frame(frame)) => ValueSpec::Frames {
                depth: self.depth,
                frame: *frame,
            },
            Some(ValueSpec::Frames { depth, frame }) => ValueSpec::Frames {
                depth: self.depth * depth,
                frame: *frame,
            },
            other => {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "frame_stack needs frames at '{}', got {other:?}",
                    self.key
                )));
            }
        };
        Ok(BTreeMap::from([(self.key.clone(), spec)]))
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn apply(&mut self, mut claimed: BTreeMap<String, ObsValue>) -> Result<BTreeMap<String, ObsValue>> {
        let value = claimed
            .remove(&self.key)
            .ok_or_else(|| stage_err("frame_stack", format!("key '{}' not claimed", self.key)))?;
        let group = into_group("frame_stack", &self.key, value)?;

        if self.buffer.is_empty() {
            for _ in 0..self.depth {
                self.buffer.push_back(group.clone());
            }
        } else {
            self.buffer.push_back(group);
            while self.buffer.len() > self.depth as usize {
                self.buffer.pop_front();
            }
        }

        let stacked: Vec<Frame> = self.buffer.iter().flat_map(|g| g.iter().cloned()).collect();
        Ok(BTreeMap::from([(self.key.clone(), ObsValue::Frames(stacked))]))
    }
}

/// Deterministic area resampling of one frame key to a fixed target size.
/// Applies per frame within a stacked group.
pub struct Resize {
    key: String,
    width: u32,
    height: u32,
}

impl Resize {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_key(FRAME_KEY, width, height)
    }

    pub fn with_key(key: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SiphonRLError::InvalidConfiguration(format!(
                "resize target must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            key: key.into(),
            width,
            height,
        })
    }
}

impl ObservationStage for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn reads(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn plan(&self, claimed: &BTreeMap<String, ValueSpec>) -> Result<BTreeMap<String, ValueSpec>> {
        let spec = match claimed.get(&self.key) {
            Some(ValueSpec::Frame(frame)) => {
                let mut out = *frame;
                out.width = self.width;
                out.height = self.height;
                ValueSpec::Frame(out)
            }
            Some(ValueSpec::Frames { depth, frame }) => {
                let mut out = *frame;
                out.width = self.width;
                out.height = self.height;
                ValueSpec::Frames {
                    depth: *depth,
                    frame: out,
                }
            }
            other => {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "resize needs frames at '{}', got {other:?}",
                    self.key
                )));
            }
        };
        Ok(BTreeMap::from([(self.key.clone(), spec)]))
    }

    fn apply(&mut self, mut claimed: BTreeMap<String, ObsValue>) -> Result<BTreeMap<String, ObsValue>> {
        let value = claimed
            .remove(&self.key)
            .ok_or_else(|| stage_err("resize", format!("key '{}' not claimed", self.key)))?;
        let was_stacked = matches!(value, ObsValue::Frames(_));
        let group = into_group("resize", &self.key, value)?;
        let mut resized = Vec::with_capacity(group.len());
        for frame in &group {
            let out = frame
                .resize_area(self.width, self.height)
                .map_err(|e| stage_err("resize", e.to_string()))?;
            resized.push(out);
        }
        Ok(BTreeMap::from([(
            self.key.clone(),
            from_group(was_stacked, resized),
        )]))
    }
}

/// Collapses one frame key to a single luminance channel. Idempotent:
/// already-gray input passes through unchanged.
pub struct Grayscale {
    key: String,
}

impl Grayscale {
    pub fn new() -> Self {
        Self::with_key(FRAME_KEY)
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for Grayscale {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationStage for Grayscale {
    fn name(&self) -> &str {
        "grayscale"
    }

    fn reads(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn writes(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn plan(&self, claimed: &BTreeMap<String, ValueSpec>) -> Result<BTreeMap<String, ValueSpec>> {
        let gray = |frame: &siphon_rl_core::FrameSpec| {
            let mut out = *frame;
            out.format = siphon_rl_core::PixelFormat::Gray8;
            out
        };
        let spec = match claimed.get(&self.key) {
            Some(ValueSpec::Frame(frame)) => ValueSpec::Frame(gray(frame)),
            Some(ValueSpec::Frames { depth, frame }) => ValueSpec::Frames {
                depth: *depth,
                frame: gray(frame),
            },
            other => {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "grayscale needs frames at '{}', got {other:?}",
                    self.key
                )));
            }
        };
        Ok(BTreeMap::from([(self.key.clone(), spec)]))
    }

    fn apply(&mut self, mut claimed: BTreeMap<String, ObsValue>) -> Result<BTreeMap<String, ObsValue>> {
        let value = claimed
            .remove(&self.key)
            .ok_or_else(|| stage_err("grayscale", format!("key '{}' not claimed", self.key)))?;
        let was_stacked = matches!(value, ObsValue::Frames(_));
        let group = into_group("grayscale", &self.key, value)?;
        let gray: Vec<Frame> = group.iter().map(Frame::to_grayscale).collect();
        Ok(BTreeMap::from([(
            self.key.clone(),
            from_group(was_stacked, gray),
        )]))
    }
}

/// Remaps configured memory attributes to `[0,1]` via `(v-min)/(max-min)`,
/// clamping out-of-range input instead of failing. Attributes without a
/// configured range are not claimed and pass through untouched.
pub struct NormalizeMemoryAttributes {
    ranges: BTreeMap<String, AttributeRange>,
}

impl NormalizeMemoryAttributes {
    pub fn new(ranges: BTreeMap<String, AttributeRange>) -> Result<Self> {
        for (name, range) in &ranges {
            if range.min >= range.max {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "normalization range for '{}' has min {} >= max {}",
                    name, range.min, range.max
                )));
            }
        }
        Ok(Self { ranges })
    }
}

impl ObservationStage for NormalizeMemoryAttributes {
    fn name(&self) -> &str {
        "normalize_memory_attributes"
    }

    fn reads(&self) -> Vec<String> {
        self.ranges.keys().cloned().collect()
    }

    fn writes(&self) -> Vec<String> {
        self.ranges.keys().cloned().collect()
    }

    fn plan(&self, claimed: &BTreeMap<String, ValueSpec>) -> Result<BTreeMap<String, ValueSpec>> {
        for (key, spec) in claimed {
            if *spec != ValueSpec::Scalar {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "normalize_memory_attributes targets scalars, '{key}' is {spec:?}"
                )));
            }
        }
        Ok(claimed.clone())
    }

    fn apply(&mut self, claimed: BTreeMap<String, ObsValue>) -> Result<BTreeMap<String, ObsValue>> {
        let mut out = BTreeMap::new();
        for (key, value) in claimed {
            let raw = value.as_scalar().ok_or_else(|| {
                stage_err(
                    "normalize_memory_attributes",
                    format!("key '{key}' is not a scalar"),
                )
            })?;
            let range = self.ranges.get(&key).ok_or_else(|| {
                stage_err(
                    "normalize_memory_attributes",
                    format!("key '{key}' has no configured range"),
                )
            })?;
            let normalized = ((raw - range.min) / (range.max - range.min)).clamp(0.0, 1.0);
            out.insert(key, ObsValue::Scalar(normalized));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ObservationPipeline;
    use siphon_rl_core::{FrameSpec, ObsSchema, Observation, PixelFormat};

    fn gray(value: u8) -> Frame {
        Frame::filled(2, 2, PixelFormat::Gray8, value)
    }

    fn frame_schema() -> ObsSchema {
        ObsSchema::new().with(
            FRAME_KEY,
            ValueSpec::Frame(FrameSpec::new(2, 2, PixelFormat::Gray8)),
        )
    }

    fn frame_obs(value: u8) -> Observation {
        Observation::new().with(FRAME_KEY, ObsValue::Frame(gray(value)))
    }

    #[test]
    fn frame_stack_seeds_with_first_frame() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(FrameStack::new(3).unwrap())
            .unwrap()
            .build();

        let out = pipeline.process(frame_obs(5)).unwrap();
        let frames = out.frames(FRAME_KEY).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| *f == gray(5)));
    }

    #[test]
    fn frame_stack_holds_last_n_oldest_first() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(FrameStack::new(3).unwrap())
            .unwrap()
            .build();

        for value in 1..=5u8 {
            pipeline.process(frame_obs(value)).unwrap();
        }
        let out = pipeline.process(frame_obs(6)).unwrap();
        let frames = out.frames(FRAME_KEY).unwrap();
        assert_eq!(frames, &[gray(4), gray(5), gray(6)]);
    }

    #[test]
    fn frame_stack_restarts_per_episode() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(FrameStack::new(3).unwrap())
            .unwrap()
            .build();

        pipeline.process(frame_obs(1)).unwrap();
        pipeline.process(frame_obs(2)).unwrap();
        pipeline.reset();

        let out = pipeline.process(frame_obs(9)).unwrap();
        let frames = out.frames(FRAME_KEY).unwrap();
        assert_eq!(frames, &[gray(9), gray(9), gray(9)]);
    }

    #[test]
    fn frame_stack_rejects_zero_depth() {
        assert!(FrameStack::new(0).is_err());
    }

    #[test]
    fn double_stacking_keeps_stages_independent() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(FrameStack::new(2).unwrap())
            .unwrap()
            .stage(FrameStack::new(2).unwrap())
            .unwrap()
            .build();

        assert_eq!(
            pipeline.output_schema().get(FRAME_KEY),
            Some(&ValueSpec::Frames {
                depth: 4,
                frame: FrameSpec::new(2, 2, PixelFormat::Gray8),
            })
        );

        pipeline.process(frame_obs(1)).unwrap();
        let out = pipeline.process(frame_obs(2)).unwrap();
        // Inner stack now holds [1,2]; outer holds [[1,1],[1,2]]
        let frames = out.frames(FRAME_KEY).unwrap();
        assert_eq!(frames, &[gray(1), gray(1), gray(1), gray(2)]);
    }

    #[test]
    fn resize_reshapes_schema_and_pixels() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(Resize::new(1, 1).unwrap())
            .unwrap()
            .build();

        assert_eq!(
            pipeline.output_schema().get(FRAME_KEY),
            Some(&ValueSpec::Frame(FrameSpec::new(1, 1, PixelFormat::Gray8)))
        );

        let obs = Observation::new().with(
            FRAME_KEY,
            ObsValue::Frame(Frame::new(2, 2, PixelFormat::Gray8, vec![0, 100, 100, 200]).unwrap()),
        );
        let out = pipeline.process(obs).unwrap();
        assert_eq!(out.frame(FRAME_KEY).unwrap().data, vec![100]);
    }

    #[test]
    fn resize_applies_per_frame_after_stacking() {
        let mut pipeline = ObservationPipeline::builder(frame_schema())
            .stage(FrameStack::new(2).unwrap())
            .unwrap()
            .stage(Resize::new(1, 1).unwrap())
            .unwrap()
            .build();

        let out = pipeline.process(frame_obs(8)).unwrap();
        let frames = out.frames(FRAME_KEY).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.spec() == FrameSpec::new(1, 1, PixelFormat::Gray8)));
    }

    #[test]
    fn resize_rejects_zero_target() {
        assert!(Resize::new(0, 84).is_err());
        assert!(Resize::new(84, 0).is_err());
    }

    #[test]
    fn grayscale_twice_equals_once() {
        let schema = ObsSchema::new().with(
            FRAME_KEY,
            ValueSpec::Frame(FrameSpec::new(2, 1, PixelFormat::Bgr8)),
        );
        let source = Frame::new(2, 1, PixelFormat::Bgr8, vec![10, 20, 30, 40, 50, 60]).unwrap();

        let mut once = ObservationPipeline::builder(schema.clone())
            .stage(Grayscale::new())
            .unwrap()
            .build();
        let mut twice = ObservationPipeline::builder(schema)
            .stage(Grayscale::new())
            .unwrap()
            .stage(Grayscale::new())
            .unwrap()
            .build();

        let obs = Observation::new().with(FRAME_KEY, ObsValue::Frame(source));
        let a = once.process(obs.clone()).unwrap();
        let b = twice.process(obs).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.frame(FRAME_KEY).unwrap().format, PixelFormat::Gray8);
    }

    #[test]
    fn normalize_clamps_to_unit_interval() {
        let schema = ObsSchema::new()
            .with("HeroHp", ValueSpec::Scalar)
            .with("NpcHp", ValueSpec::Scalar);
        let ranges = BTreeMap::from([(
            "HeroHp".to_string(),
            AttributeRange::new(0.0, 1000.0),
        )]);
        let mut pipeline = ObservationPipeline::builder(schema)
            .stage(NormalizeMemoryAttributes::new(ranges).unwrap())
            .unwrap()
            .build();

        for (raw, expected) in [(500.0, 0.5), (1500.0, 1.0), (-10.0, 0.0), (0.0, 0.0)] {
            let obs = Observation::new()
                .with("HeroHp", ObsValue::Scalar(raw))
                .with("NpcHp", ObsValue::Scalar(4200.0));
            let out = pipeline.process(obs).unwrap();
            assert_eq!(out.scalar("HeroHp"), Some(expected), "raw {raw}");
            // Unconfigured attribute passes through untouched
            assert_eq!(out.scalar("NpcHp"), Some(4200.0));
        }
    }

    #[test]
    fn normalize_rejects_unknown_attribute_at_build() {
        let schema = ObsSchema::new().with("HeroHp", ValueSpec::Scalar);
        let ranges = BTreeMap::from([(
            "Stamina".to_string(),
            AttributeRange::new(0.0, 100.0),
        )]);
        let err = ObservationPipeline::builder(schema)
            .stage(NormalizeMemoryAttributes::new(ranges).unwrap())
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidConfiguration(_)), "{err}");
    }

    #[test]
    fn normalize_rejects_frame_target_at_build() {
        let err = ObservationPipeline::builder(frame_schema())
            .stage(
                NormalizeMemoryAttributes::new(BTreeMap::from([(
                    FRAME_KEY.to_string(),
                    AttributeRange::new(0.0, 255.0),
                )]))
                .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidConfiguration(_)), "{err}");
    }

    #[test]
    fn normalize_rejects_inverted_range() {
        let ranges = BTreeMap::from([("HeroHp".to_string(), AttributeRange::new(10.0, 10.0))]);
        assert!(NormalizeMemoryAttributes::new(ranges).is_err());
    }
}
