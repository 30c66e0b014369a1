//! Observation pipeline composition harness

use std::collections::BTreeMap;

use tracing::debug;

use siphon_rl_core::{ObsSchema, ObsValue, Observation, Result, SiphonRLError, ValueSpec};

/// One unit of observation transformation.
///
/// A stage declares the keys it reads and writes and how it transforms
/// their shape contract; the harness hands it exactly the entries it
/// claimed and reinserts exactly the entries it declared. Pass-through of
/// untouched keys is the harness's job, never the stage's.
pub trait ObservationStage: Send {
    /// Stable stage name used in errors and logs
    fn name(&self) -> &str;

    /// Keys removed from the observation and handed to `apply`
    fn reads(&self) -> Vec<String>;

    /// Keys `apply` must return; reinserted by the harness
    fn writes(&self) -> Vec<String>;

    /// Construction-time schema transform over exactly the claimed entries.
    /// Rejects incompatible input shapes with `InvalidConfiguration`.
    fn plan(&self, claimed: &BTreeMap<String, ValueSpec>) -> Result<BTreeMap<String, ValueSpec>>;

    /// Clears cross-step state at episode boundaries
    fn reset(&mut self) {}

    /// Runtime transform over exactly the claimed entries
    fn apply(&mut self, claimed: BTreeMap<String, ObsValue>) -> Result<BTreeMap<String, ObsValue>>;
}

struct StageSlot {
    stage: Box<dyn ObservationStage>,
    name: String,
    reads: Vec<String>,
    /// Output specs fixed at construction, re-checked after every apply
    planned: BTreeMap<String, ValueSpec>,
}

/// Builds an [`ObservationPipeline`], validating every stage against the
/// evolving schema so shape/key mistakes fail before any game interaction.
pub struct PipelineBuilder {
    input: ObsSchema,
    schema: ObsSchema,
    slots: Vec<StageSlot>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("input", &self.input)
            .field("schema", &self.schema)
            .field(
                "stages",
                &self.slots.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PipelineBuilder {
    fn new(input: ObsSchema) -> Self {
        Self {
            schema: input.clone(),
            input,
            slots: Vec::new(),
        }
    }

    /// Appends a stage, checking its declared reads/writes and schema
    /// transform at this composition point
    pub fn stage(self, stage: impl ObservationStage + 'static) -> Result<Self> {
        self.boxed(Box::new(stage))
    }

    pub fn boxed(mut self, stage: Box<dyn ObservationStage>) -> Result<Self> {
        let name = stage.name().to_string();
        let reads = stage.reads();
        let writes = stage.writes();

        let mut claimed = BTreeMap::new();
        for key in &reads {
            let spec = self.schema.get(key).copied().ok_or_else(|| {
                SiphonRLError::InvalidConfiguration(format!(
                    "stage '{name}' reads key '{key}' absent from the observation contract"
                ))
            })?;
            claimed.insert(key.clone(), spec);
        }
        for key in &writes {
            if self.schema.contains(key) && !reads.contains(key) {
                return Err(SiphonRLError::InvalidConfiguration(format!(
                    "stage '{name}' writes key '{key}' it does not read"
                )));
            }
        }

        let planned = stage.plan(&claimed)?;
        if planned.len() != writes.len() || writes.iter().any(|key| !planned.contains_key(key)) {
            return Err(SiphonRLError::InvalidConfiguration(format!(
                "stage '{name}' planned keys do not match its declared writes"
            )));
        }

        for key in &reads {
            self.schema.remove(key);
        }
        for (key, spec) in &planned {
            self.schema.insert(key.clone(), *spec);
        }
        self.slots.push(StageSlot {
            stage,
            name,
            reads,
            planned,
        });
        Ok(self)
    }

    pub fn build(self) -> ObservationPipeline {
        ObservationPipeline {
            input_schema: self.input,
            output_schema: self.schema,
            slots: self.slots,
        }
    }
}

/// Ordered stage chain over structured observations.
///
/// Keys a stage does not claim are forwarded untouched by construction:
/// stages only ever see the entries they declared. Keys outside the input
/// contract ride through the whole chain unchanged.
pub struct ObservationPipeline {
    slots: Vec<StageSlot>,
    input_schema: ObsSchema,
    output_schema: ObsSchema,
}

impl ObservationPipeline {
    pub fn builder(input: ObsSchema) -> PipelineBuilder {
        PipelineBuilder::new(input)
    }

    /// Contract the raw observation must satisfy
    pub fn input_schema(&self) -> &ObsSchema {
        &self.input_schema
    }

    /// Contract of the transformed observation
    pub fn output_schema(&self) -> &ObsSchema {
        &self.output_schema
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Restarts every stateful stage for a fresh episode
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.stage.reset();
        }
    }

    /// Runs the chain over one observation
    pub fn process(&mut self, mut observation: Observation) -> Result<Observation> {
        self.check_input(&observation)?;

        for slot in &mut self.slots {
            let mut claimed = BTreeMap::new();
            for key in &slot.reads {
                let value = observation.remove(key).ok_or_else(|| SiphonRLError::Pipeline {
                    stage: slot.name.clone(),
                    message: format!("required key '{key}' missing from observation"),
                })?;
                claimed.insert(key.clone(), value);
            }

            let produced = slot.stage.apply(claimed)?;
            debug!(stage = %slot.name, produced = produced.len(), "stage applied");

            if produced.len() != slot.planned.len() {
                return Err(SiphonRLError::Pipeline {
                    stage: slot.name.clone(),
                    message: format!(
                        "produced {} keys, declared {}",
                        produced.len(),
                        slot.planned.len()
                    ),
                });
            }
            for (key, value) in produced {
                let planned = slot.planned.get(&key).ok_or_else(|| SiphonRLError::Pipeline {
                    stage: slot.name.clone(),
                    message: format!("produced undeclared key '{key}'"),
                })?;
                let actual = value.spec().ok_or_else(|| SiphonRLError::Pipeline {
                    stage: slot.name.clone(),
                    message: format!("produced malformed value for key '{key}'"),
                })?;
                if actual != *planned {
                    return Err(SiphonRLError::Pipeline {
                        stage: slot.name.clone(),
                        message: format!(
                            "key '{key}' has shape {actual:?}, planned {planned:?}"
                        ),
                    });
                }
                observation.insert(key, value);
            }
        }
        Ok(observation)
    }

    fn check_input(&self, observation: &Observation) -> Result<()> {
        for (key, expected) in self.input_schema.iter() {
            let value = observation.get(key).ok_or_else(|| SiphonRLError::Pipeline {
                stage: "input".to_string(),
                message: format!("contract key '{key}' missing from observation"),
            })?;
            let actual = value.spec().ok_or_else(|| SiphonRLError::Pipeline {
                stage: "input".to_string(),
                message: format!("contract key '{key}' holds a malformed value"),
            })?;
            if actual != *expected {
                return Err(SiphonRLError::Pipeline {
                    stage: "input".to_string(),
                    message: format!("key '{key}' has shape {actual:?}, contract says {expected:?}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_rl_core::{FRAME_KEY, Frame, FrameSpec, PixelFormat};

    /// Doubles a scalar in place
    struct DoubleScalar {
        key: String,
    }

    impl ObservationStage for DoubleScalar {
        fn name(&self) -> &str {
            "double_scalar"
        }
        fn reads(&self) -> Vec<String> {
            vec![self.key.clone()]
        }
        fn writes(&self) -> Vec<String> {
            vec![self.key.clone()]
        }
        fn plan(
            &self,
            claimed: &BTreeMap<String, ValueSpec>,
        ) -> Result<BTreeMap<String, ValueSpec>> {
            match claimed.get(&self.key) {
                Some(ValueSpec::Scalar) => Ok(claimed.clone()),
                other => Err(SiphonRLError::InvalidConfiguration(format!(
                    "double_scalar needs a scalar, got {other:?}"
                ))),
            }
        }
        fn apply(
            &mut self,
            mut claimed: BTreeMap<String, ObsValue>,
        ) -> Result<BTreeMap<String, ObsValue>> {
            let value = match claimed.remove(&self.key) {
                Some(ObsValue::Scalar(v)) => v,
                _ => {
                    return Err(SiphonRLError::Pipeline {
                        stage: "double_scalar".to_string(),
                        message: "scalar input expected".to_string(),
                    });
                }
            };
            claimed.insert(self.key.clone(), ObsValue::Scalar(value * 2.0));
            Ok(claimed)
        }
    }

    /// Misbehaving stage: declares one write, returns another
    struct RenegadeStage;

    impl ObservationStage for RenegadeStage {
        fn name(&self) -> &str {
            "renegade"
        }
        fn reads(&self) -> Vec<String> {
            vec!["a".to_string()]
        }
        fn writes(&self) -> Vec<String> {
            vec!["a".to_string()]
        }
        fn plan(
            &self,
            claimed: &BTreeMap<String, ValueSpec>,
        ) -> Result<BTreeMap<String, ValueSpec>> {
            Ok(claimed.clone())
        }
        fn apply(
            &mut self,
            _claimed: BTreeMap<String, ObsValue>,
        ) -> Result<BTreeMap<String, ObsValue>> {
            let mut out = BTreeMap::new();
            out.insert("b".to_string(), ObsValue::Scalar(1.0));
            Ok(out)
        }
    }

    fn base_schema() -> ObsSchema {
        ObsSchema::new()
            .with(FRAME_KEY, ValueSpec::Frame(FrameSpec::new(2, 2, PixelFormat::Gray8)))
            .with("HeroHp", ValueSpec::Scalar)
            .with("NpcHp", ValueSpec::Scalar)
    }

    fn base_obs() -> Observation {
        Observation::new()
            .with(FRAME_KEY, ObsValue::Frame(Frame::filled(2, 2, PixelFormat::Gray8, 9)))
            .with("HeroHp", ObsValue::Scalar(100.0))
            .with("NpcHp", ObsValue::Scalar(500.0))
    }

    #[test]
    fn untouched_keys_are_forwarded() {
        let mut pipeline = ObservationPipeline::builder(base_schema())
            .stage(DoubleScalar {
                key: "HeroHp".to_string(),
            })
            .unwrap()
            .build();

        let out = pipeline.process(base_obs()).unwrap();
        assert_eq!(out.scalar("HeroHp"), Some(200.0));
        assert_eq!(out.scalar("NpcHp"), Some(500.0));
        assert!(out.frame(FRAME_KEY).is_some());
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn unknown_reads_fail_at_construction() {
        let err = ObservationPipeline::builder(base_schema())
            .stage(DoubleScalar {
                key: "Stamina".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidConfiguration(_)), "{err}");
    }

    #[test]
    fn shape_mismatch_fails_at_construction() {
        // Doubling the frame key is a schema violation, not a runtime one
        let err = ObservationPipeline::builder(base_schema())
            .stage(DoubleScalar {
                key: FRAME_KEY.to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SiphonRLError::InvalidConfiguration(_)), "{err}");
    }

    #[test]
    fn missing_key_at_runtime_names_stage_and_key() {
        let mut pipeline = ObservationPipeline::builder(base_schema())
            .stage(DoubleScalar {
                key: "HeroHp".to_string(),
            })
            .unwrap()
            .build();

        let mut obs = base_obs();
        obs.remove("HeroHp");
        let err = pipeline.process(obs).unwrap_err();
        match err {
            SiphonRLError::Pipeline { stage, message } => {
                assert_eq!(stage, "input");
                assert!(message.contains("HeroHp"), "{message}");
            }
            other => panic!("expected pipeline error, got {other}"),
        }
    }

    #[test]
    fn undeclared_writes_are_rejected_at_runtime() {
        let mut pipeline = ObservationPipeline::builder(
            ObsSchema::new().with("a", ValueSpec::Scalar),
        )
        .stage(RenegadeStage)
        .unwrap()
        .build();

        let obs = Observation::new().with("a", ObsValue::Scalar(1.0));
        let err = pipeline.process(obs).unwrap_err();
        match err {
            SiphonRLError::Pipeline { stage, .. } => assert_eq!(stage, "renegade"),
            other => panic!("expected pipeline error, got {other}"),
        }
    }

    #[test]
    fn input_shape_is_checked_against_contract() {
        let mut pipeline = ObservationPipeline::builder(base_schema()).build();
        let mut obs = base_obs();
        obs.insert(
            FRAME_KEY,
            ObsValue::Frame(Frame::filled(4, 4, PixelFormat::Gray8, 0)),
        );
        let err = pipeline.process(obs).unwrap_err();
        assert!(matches!(err, SiphonRLError::Pipeline { .. }), "{err}");
    }

    #[test]
    fn keys_outside_the_contract_ride_through() {
        let mut pipeline = ObservationPipeline::builder(base_schema())
            .stage(DoubleScalar {
                key: "HeroHp".to_string(),
            })
            .unwrap()
            .build();

        let obs = base_obs().with("extra", ObsValue::Scalar(7.0));
        let out = pipeline.process(obs).unwrap();
        assert_eq!(out.scalar("extra"), Some(7.0));
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let mut pipeline = ObservationPipeline::builder(base_schema()).build();
        let out = pipeline.process(base_obs()).unwrap();
        assert_eq!(out, base_obs());
        assert_eq!(pipeline.output_schema(), pipeline.input_schema());
    }
}
