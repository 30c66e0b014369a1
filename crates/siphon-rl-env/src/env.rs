//! Environment core: lifecycle, step sequencing, atomic commits

use std::collections::BTreeMap;

use tracing::{debug, warn};

use siphon_rl_core::{
    ActionSpace, AgentAction, AttrValue, FRAME_KEY, ObsSchema, ObsValue, Observation, Result,
    RewardStrategy, ScoreDeltaReward, SiphonRLError, StepInfo, StepResult, TelemetrySnapshot,
    ValueSpec,
};

use crate::config::EnvConfig;
use crate::dispatch::{ActionDispatcher, PendingDispatch};
use crate::interface::GameInterface;
use crate::pipeline::ObservationPipeline;
use crate::stages::{FrameStack, Grayscale, NormalizeMemoryAttributes, Resize};
use crate::tracker::{EpisodeTracker, StepAccounting, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No episode yet, or the last one ended irrecoverably
    Uninitialized,
    Ready,
    Done,
}

/// The environment: one agent, one game, episodic interaction.
///
/// Owns the dispatcher, pipeline, tracker and reward strategy and runs the
/// step sequence over any [`GameInterface`]. A step either completes fully
/// or changes nothing: every mutation of episode state happens after the
/// last fallible operation, so callers never see half a step.
///
/// Single-agent by construction; wrap it in a mutex to share, or run one
/// environment per game process.
pub struct SiphonEnv<G: GameInterface> {
    game: G,
    config: EnvConfig,
    dispatcher: ActionDispatcher,
    pipeline: ObservationPipeline,
    strategy: Box<dyn RewardStrategy>,
    tracker: EpisodeTracker,
    prev_info: Option<StepInfo>,
    phase: Phase,
}

impl<G: GameInterface> SiphonEnv<G> {
    /// Environment with the stock score-delta reward
    pub fn new(game: G, config: EnvConfig) -> Result<Self> {
        Self::with_strategy(game, config, Box::new(ScoreDeltaReward::default()))
    }

    pub fn with_strategy(
        game: G,
        config: EnvConfig,
        strategy: Box<dyn RewardStrategy>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = build_pipeline(&config)?;
        let dispatcher =
            ActionDispatcher::new(config.action_space.clone(), config.action_persistence);
        let tracker =
            EpisodeTracker::new(config.health.clone(), config.refund, config.max_steps);
        Ok(Self {
            game,
            config,
            dispatcher,
            pipeline,
            strategy,
            tracker,
            prev_info: None,
            phase: Phase::Uninitialized,
        })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn action_space(&self) -> &ActionSpace {
        self.dispatcher.space()
    }

    /// Shape contract of the observations this environment returns
    pub fn observation_schema(&self) -> &ObsSchema {
        self.pipeline.output_schema()
    }

    /// Starts a fresh episode: releases held inputs, restarts the scenario,
    /// clears pipeline and tracker state and returns the first observation.
    /// The returned record is step 0; its snapshot is not a damage baseline,
    /// so the first step after reset also reports zero deltas.
    pub async fn reset(&mut self) -> Result<(Observation, StepInfo)> {
        self.phase = Phase::Uninitialized;
        if let Some(command) = self.dispatcher.release() {
            self.game.send_input(&command).await?;
        }
        self.game.reset_episode().await?;
        self.pipeline.reset();
        self.tracker = EpisodeTracker::new(
            self.config.health.clone(),
            self.config.refund,
            self.config.max_steps,
        );
        self.prev_info = None;

        if self.config.freeze_game {
            self.game.set_frozen(true).await?;
        }
        let snapshot = self.game.poll(self.config.poll_timeout()).await?;
        let accounting = self.tracker.account(&snapshot)?;
        let base = self.base_observation(&snapshot, &accounting)?;
        let observation = self.pipeline.process(base)?;
        let mut info = self.build_info(&accounting);
        info.step = 0;

        debug!(attributes = snapshot.attributes.len(), "episode reset");
        self.phase = Phase::Ready;
        Ok((observation, info))
    }

    /// Runs one step: dispatch the action, let the game advance, poll a
    /// snapshot, transform it, account it, reward it, commit.
    ///
    /// An invalid action is rejected before the game is touched and leaves
    /// the episode playable. Any later failure aborts the step with nothing
    /// committed and ends the episode, since the game may have moved.
    pub async fn step(&mut self, action: &AgentAction) -> Result<StepResult> {
        match self.phase {
            Phase::Uninitialized => {
                return Err(SiphonRLError::InvalidState(
                    "environment not reset; call reset() before step()".to_string(),
                ));
            }
            Phase::Done => {
                return Err(SiphonRLError::InvalidState(
                    "episode is over; call reset() to start another".to_string(),
                ));
            }
            Phase::Ready => {}
        }

        let pending = self.dispatcher.prepare(action)?;

        match self.advance(pending).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.phase = Phase::Done;
                Err(err)
            }
        }
    }

    async fn advance(&mut self, pending: PendingDispatch) -> Result<StepResult> {
        if self.config.freeze_game {
            self.game.set_frozen(false).await?;
        }
        if let Some(command) = &pending.command {
            self.game.send_input(command).await?;
        }
        if self.config.frame_skip > 0 {
            self.game.skip_frames(self.config.frame_skip).await?;
        }
        if self.config.freeze_game {
            self.game.set_frozen(true).await?;
        }
        let snapshot = self.game.poll(self.config.poll_timeout()).await?;

        let accounting = self.tracker.account(&snapshot)?;
        let base = self.base_observation(&snapshot, &accounting)?;
        let observation = self.pipeline.process(base)?;
        let mut info = self.build_info(&accounting);

        let terminated =
            accounting.verdict.is_terminal() || self.strategy.is_terminal(&observation, &info);
        let truncated = accounting.verdict == Verdict::TimedOut;
        let reward = self
            .strategy
            .compute(&observation, &info, self.prev_info.as_ref());

        // Commit point. Nothing below fails; nothing above mutated
        // dispatcher or tracker state.
        self.tracker.commit(snapshot, &accounting, reward);
        self.dispatcher.commit(pending);
        if terminated || truncated {
            info.episode = Some(self.tracker.summary());
            self.phase = Phase::Done;
        }
        self.prev_info = Some(info.clone());

        debug!(step = info.step, reward, terminated, truncated, "step committed");
        Ok(StepResult {
            observation,
            reward,
            terminated,
            truncated,
            info,
        })
    }

    /// Releases held inputs (best effort) and shuts the game interface down
    pub async fn close(&mut self) -> Result<()> {
        self.phase = Phase::Done;
        if let Some(command) = self.dispatcher.release() {
            if let Err(err) = self.game.send_input(&command).await {
                warn!(%err, "failed to release inputs during close");
            }
        }
        self.game.shutdown().await
    }

    /// Raw observation for one snapshot: the captured frame plus the
    /// configured attribute scalars, reported values throughout
    fn base_observation(
        &self,
        snapshot: &TelemetrySnapshot,
        accounting: &StepAccounting,
    ) -> Result<Observation> {
        let mut observation = Observation::new();
        observation.insert(FRAME_KEY, ObsValue::Frame(snapshot.frame.clone()));
        for name in &self.config.observed_attributes {
            let value = accounting
                .reported_attributes
                .get(name)
                .map(AttrValue::as_f64)
                .ok_or_else(|| {
                    SiphonRLError::Protocol(format!(
                        "telemetry is missing observed attribute '{name}'"
                    ))
                })?;
            observation.insert(name.clone(), ObsValue::Scalar(value));
        }
        Ok(observation)
    }

    fn build_info(&self, accounting: &StepAccounting) -> StepInfo {
        StepInfo {
            step: accounting.step,
            player_hp: accounting.player_hp,
            player_max_hp: accounting.player_max_hp,
            player_hp_normalized: accounting.player_hp_normalized,
            boss_hp: accounting.boss_hp,
            boss_max_hp: accounting.boss_max_hp,
            boss_hp_normalized: accounting.boss_hp_normalized,
            player_damage_taken: accounting.player_damage_taken,
            player_damage_taken_normalized: accounting.player_damage_taken_normalized,
            boss_damage_dealt: accounting.boss_damage_dealt,
            boss_damage_dealt_normalized: accounting.boss_damage_dealt_normalized,
            player_hp_refunded: accounting.player_hp_refunded,
            boss_hp_refunded: accounting.boss_hp_refunded,
            attributes: accounting.reported_attributes.clone(),
            episode: None,
            extra: BTreeMap::new(),
        }
    }
}

fn base_schema(config: &EnvConfig) -> ObsSchema {
    let mut schema = ObsSchema::new().with(FRAME_KEY, ValueSpec::Frame(config.source_frame));
    for name in &config.observed_attributes {
        schema.insert(name.clone(), ValueSpec::Scalar);
    }
    schema
}

/// Standard stage chain from declarative config: resize, grayscale, frame
/// stack, attribute normalization, in that order
fn build_pipeline(config: &EnvConfig) -> Result<ObservationPipeline> {
    let mut builder = ObservationPipeline::builder(base_schema(config));
    if let Some(target) = &config.pipeline.resize {
        builder = builder.stage(Resize::new(target.width, target.height)?)?;
    }
    if config.pipeline.grayscale {
        builder = builder.stage(Grayscale::new())?;
    }
    if let Some(depth) = config.pipeline.frame_stack {
        builder = builder.stage(FrameStack::new(depth)?)?;
    }
    if !config.pipeline.normalize.is_empty() {
        builder = builder.stage(NormalizeMemoryAttributes::new(
            config.pipeline.normalize.clone(),
        )?)?;
    }
    Ok(builder.build())
}
